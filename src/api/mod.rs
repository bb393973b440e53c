//! HTTP API: proposal control, status and the read-only order data service

use crate::chain::codec::decimal_u256;
use crate::chain::{
    MultisigData, Operation, OrderLedger, OrderLister, OrderState, SafeCoordinator,
    SafeTransaction,
};
use crate::config::{ApiConfig, Role};
use crate::error::ApprovalError;
use crate::tx::{OrderProposer, OrderRequest, ProposalRequest, RetryRunner, SafeProposer};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state; absent components disable their routes
#[derive(Clone)]
pub struct AppState {
    pub role: Role,
    pub retry: RetryRunner,
    pub signer: Option<SignerInfo>,
    pub safe_coordinator: Option<Arc<dyn SafeCoordinator>>,
    pub safe_proposer: Option<Arc<SafeProposer>>,
    pub order_ledger: Option<Arc<dyn OrderLedger>>,
    pub order_lister: Option<Arc<OrderLister>>,
    pub order_proposer: Option<Arc<OrderProposer>>,
}

impl AppState {
    pub fn new(role: Role, retry: RetryRunner) -> Self {
        Self {
            role,
            retry,
            signer: None,
            safe_coordinator: None,
            safe_proposer: None,
            order_ledger: None,
            order_lister: None,
            order_proposer: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerInfo {
    pub index: usize,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_wallet: Option<String>,
}

impl SignerInfo {
    pub fn new(index: usize, address: Address, order_wallet: Option<String>) -> Self {
        Self {
            index,
            address: to_checksum(&address, None),
            order_wallet,
        }
    }
}

/// Error body: `{success:false, error, message}`
#[derive(Debug)]
pub struct ApiError(ApprovalError);

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ApprovalError::InvalidInput(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = ErrorResponse {
            success: false,
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the router for the components present in `state`
pub fn router(state: AppState) -> Router {
    let mut app = Router::new().route("/health", get(health_check));

    if state.safe_proposer.is_some() {
        app = app.route("/propose", post(propose));
    }
    if state.safe_coordinator.is_some() && state.role == Role::Controller {
        app = app
            .route("/status", get(pending_status))
            .route("/status/:hash", get(transaction_status));
    }
    if state.order_proposer.is_some() {
        app = app.route("/create-order", post(create_order));
    }
    if state.order_ledger.is_some() {
        app = app
            .route("/multisig_data/:address", get(multisig_data))
            .route("/order_data/:address", get(order_data));
    }
    if state.order_lister.is_some() {
        app = app.route("/pending_orders/:multisig/:signer", get(pending_orders));
    }
    if state.signer.is_some() {
        app = app.route("/info", get(signer_info));
    }

    app.layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server on {}", addr))?;
    axum::serve(listener, app).await.context("API server failed")?;

    Ok(())
}

fn missing(component: &str) -> ApiError {
    ApiError(ApprovalError::ConfigMissing(format!("{} is not configured", component)))
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        role: state.role,
    })
}

async fn propose(
    State(state): State<AppState>,
    body: Result<Json<ProposeRequest>, JsonRejection>,
) -> ApiResult<ProposeResponse> {
    let Json(body) = body?;
    let proposer = state.safe_proposer.as_ref().ok_or_else(|| missing("safe backend"))?;

    let safe_tx_hash = proposer
        .propose(ProposalRequest {
            to: body.to,
            value: body.value,
            data: body.data.unwrap_or_default(),
            operation: body.operation.unwrap_or_default(),
        })
        .await?;

    Ok(Json(ProposeResponse {
        success: true,
        safe_tx_hash,
        message: "Transaction proposed".to_string(),
    }))
}

async fn pending_status(State(state): State<AppState>) -> ApiResult<PendingStatusResponse> {
    let coordinator = state.safe_coordinator.as_ref().ok_or_else(|| missing("safe backend"))?;
    let pending = state
        .retry
        .run("pending transactions", || coordinator.pending_transactions())
        .await?;

    Ok(Json(PendingStatusResponse {
        success: true,
        pending_transactions: pending.iter().map(TransactionSummary::from).collect(),
    }))
}

async fn transaction_status(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<TransactionStatusResponse> {
    let coordinator = state.safe_coordinator.as_ref().ok_or_else(|| missing("safe backend"))?;
    let hash: H256 = hash
        .parse()
        .map_err(|_| ApprovalError::InvalidInput(format!("invalid safeTxHash {}", hash)))?;

    let tx = state
        .retry
        .run("transaction details", || coordinator.transaction(hash))
        .await?;

    Ok(Json(TransactionStatusResponse {
        success: true,
        safe_transaction: tx,
    }))
}

async fn create_order(
    State(state): State<AppState>,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> ApiResult<CreateOrderResponse> {
    let Json(body) = body?;
    let proposer = state.order_proposer.as_ref().ok_or_else(|| missing("order backend"))?;

    let order = proposer
        .create_order(OrderRequest {
            to: body.to,
            value: body.value,
        })
        .await?;
    let order = proposer.await_execution(&order).await?;

    Ok(Json(CreateOrderResponse {
        success: true,
        order_data: order,
    }))
}

async fn multisig_data(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<DataResponse<MultisigData>> {
    let ledger = state.order_ledger.as_ref().ok_or_else(|| missing("order backend"))?;
    let data = state
        .retry
        .run("multisig data", || ledger.multisig_data(&address))
        .await?;
    Ok(Json(DataResponse::ok(data)))
}

async fn order_data(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<DataResponse<OrderState>> {
    let ledger = state.order_ledger.as_ref().ok_or_else(|| missing("order backend"))?;
    let data = state
        .retry
        .run("order data", || ledger.order_data(&address))
        .await?;
    Ok(Json(DataResponse::ok(data)))
}

async fn pending_orders(
    State(state): State<AppState>,
    Path((multisig, signer)): Path<(String, String)>,
) -> ApiResult<DataResponse<Vec<OrderState>>> {
    let lister = state.order_lister.as_ref().ok_or_else(|| missing("order backend"))?;
    let pending = lister.scan(&multisig, &signer).await?;
    Ok(Json(DataResponse::ok(pending)))
}

async fn signer_info(State(state): State<AppState>) -> ApiResult<InfoResponse> {
    let signer = state.signer.clone().ok_or_else(|| missing("signer identity"))?;
    Ok(Json(InfoResponse {
        success: true,
        signer,
    }))
}

// Request/Response types

#[derive(Debug, Deserialize)]
struct ProposeRequest {
    to: Address,
    #[serde(with = "decimal_u256")]
    value: U256,
    #[serde(default)]
    data: Option<Bytes>,
    #[serde(default)]
    operation: Option<Operation>,
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    to: String,
    #[serde(with = "decimal_u256")]
    value: U256,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    role: Role,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: &'static str,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProposeResponse {
    success: bool,
    safe_tx_hash: H256,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionSummary {
    safe_tx_hash: H256,
    nonce: u64,
    confirmations: usize,
    confirmations_required: usize,
    is_executed: bool,
}

impl From<&SafeTransaction> for TransactionSummary {
    fn from(tx: &SafeTransaction) -> Self {
        Self {
            safe_tx_hash: tx.safe_tx_hash,
            nonce: tx.nonce,
            confirmations: tx.confirmation_count(),
            confirmations_required: tx.confirmations_required,
            is_executed: tx.is_executed,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingStatusResponse {
    success: bool,
    pending_transactions: Vec<TransactionSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionStatusResponse {
    success: bool,
    safe_transaction: SafeTransaction,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderResponse {
    success: bool,
    order_data: OrderState,
}

#[derive(Serialize)]
struct DataResponse<T> {
    success: bool,
    data: T,
}

impl<T> DataResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Serialize)]
struct InfoResponse {
    success: bool,
    signer: SignerInfo,
}
