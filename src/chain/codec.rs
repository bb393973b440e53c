//! Serde helpers for the loosely-typed JSON the backends return
//!
//! Both backends emit large integers as decimal strings and small ones as
//! either strings or numbers depending on the endpoint version.

use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

/// U256 as a base-10 string
pub mod decimal_u256 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        value.to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        match NumOrString::deserialize(d)? {
            NumOrString::Num(n) => Ok(U256::from(n)),
            NumOrString::Str(s) if s.starts_with("0x") => {
                U256::from_str_radix(&s[2..], 16).map_err(de::Error::custom)
            }
            NumOrString::Str(s) => U256::from_dec_str(&s).map_err(de::Error::custom),
        }
    }
}

/// u64 that may arrive as a number or a numeric string
pub mod flexible_u64 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match NumOrString::deserialize(d)? {
            NumOrString::Num(n) => Ok(n),
            NumOrString::Str(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }
}

/// Address in EIP-55 mixed-case form
pub fn checksum_address<S: Serializer>(address: &Address, s: S) -> Result<S::Ok, S::Error> {
    to_checksum(address, None).serialize(s)
}

/// Treat an explicit JSON `null` like a missing field
pub fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}
