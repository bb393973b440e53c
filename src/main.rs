//! Multisig Relayer - polling coordination of N-of-M approvals
//!
//! One binary runs as either the controller (proposes, reports status and
//! executes fully-signed Safe transactions) or a signer (reviews and approves
//! pending items on the Safe and order-based backends).

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

mod api;
mod chain;
mod config;
mod coordination;
mod error;
mod identity;
mod metrics;
#[cfg(test)]
mod testing;
mod tx;

use api::{AppState, SignerInfo};
use chain::{
    EthersSafeChain, GatewayOrderLedger, OrderLedger, OrderLister, SafeChain, SafeCoordinator,
    SafeServiceClient,
};
use config::{LogFormat, Role, Settings};
use coordination::{
    OrderSignerPipeline, ResolvedIndexCache, SafeExecutorPipeline, SafeSignerPipeline, Scheduler,
    SchedulerHandle, Validator, ValidatorChain,
};
use identity::Identity;
use metrics::MetricsServer;
use tx::{OrderConfirmer, OrderProposer, RetryRunner, SafeConfirmer, SafeExecutor, SafeProposer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(settings.service.log_format);

    info!(
        "Starting Multisig Relayer v{} as {:?}",
        env!("CARGO_PKG_VERSION"),
        settings.service.role
    );

    let identity = Identity::load(&settings)?;
    let role = settings.service.role;
    let retry = RetryRunner::from_config(&settings.retry);
    let validator: Arc<dyn Validator> = Arc::new(ValidatorChain::from_config(
        &settings.validator,
        identity.index,
    )?);

    let mut state = AppState::new(role, retry);
    let mut schedulers: Vec<SchedulerHandle> = Vec::new();

    if role == Role::Signer {
        state.signer = Some(SignerInfo::new(
            identity.index,
            identity.address(),
            identity.order_address.clone(),
        ));
    }

    // Safe backend
    if let Some(safe) = settings.safe_backend() {
        let coordinator: Arc<dyn SafeCoordinator> = Arc::new(SafeServiceClient::new(safe)?);
        let interval = Duration::from_secs(safe.poll_interval_secs);
        state.safe_coordinator = Some(coordinator.clone());

        match role {
            Role::Controller => {
                let chain: Arc<dyn SafeChain> =
                    Arc::new(EthersSafeChain::new(safe, identity.wallet.clone())?);
                state.safe_proposer = Some(Arc::new(SafeProposer::new(
                    coordinator.clone(),
                    chain.clone(),
                    identity.wallet.clone(),
                    retry,
                )));

                let executor = SafeExecutor::new(coordinator.clone(), chain, retry);
                let pipeline = SafeExecutorPipeline::new(coordinator, executor, retry);
                schedulers.push(Arc::new(Scheduler::new(pipeline, interval)).start());
            }
            Role::Signer => {
                let confirmer = SafeConfirmer::new(coordinator.clone(), identity.wallet.clone(), retry);
                let pipeline =
                    SafeSignerPipeline::new(coordinator, confirmer, validator.clone(), retry);
                schedulers.push(Arc::new(Scheduler::new(pipeline, interval)).start());
            }
        }
        info!("Safe backend enabled for {}", safe.safe_address);
    }

    // Order backend
    if let Some(order) = settings.order_backend() {
        let ledger: Arc<dyn OrderLedger> = Arc::new(GatewayOrderLedger::new(order)?);
        let interval = Duration::from_secs(order.poll_interval_secs);
        let signer_wallet = identity.order_address.clone().unwrap_or_default();

        state.order_ledger = Some(ledger.clone());
        state.order_lister = Some(Arc::new(OrderLister::new(
            ledger.clone(),
            order.multisig_address.clone(),
            signer_wallet.clone(),
            Arc::new(ResolvedIndexCache::new()),
            retry,
        )));

        match role {
            Role::Controller => {
                state.order_proposer = Some(Arc::new(OrderProposer::new(
                    ledger,
                    order.multisig_address.clone(),
                    retry,
                    Duration::from_secs(order.order_ttl_secs),
                )));
            }
            Role::Signer => {
                let lister = OrderLister::new(
                    ledger.clone(),
                    order.multisig_address.clone(),
                    signer_wallet.clone(),
                    Arc::new(ResolvedIndexCache::new()),
                    retry,
                );
                let confirmer = OrderConfirmer::new(ledger, signer_wallet, retry);
                let pipeline = OrderSignerPipeline::new(lister, confirmer, validator.clone());
                schedulers.push(Arc::new(Scheduler::new(pipeline, interval)).start());
            }
        }
        info!("Order backend enabled for {}", order.multisig_address);
    }

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {:#}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {:#}", e);
            }
        }))
    } else {
        None
    };

    info!("Multisig Relayer is running with {} schedulers", schedulers.len());
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    for scheduler in schedulers {
        scheduler.stop().await;
    }

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Multisig Relayer stopped");
    Ok(())
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,multisig_relayer=debug,hyper=warn,reqwest=warn")
    });
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
