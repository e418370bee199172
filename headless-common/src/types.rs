//! Core domain types for the headless wallet core
//!
//! These are the small value types that flow between the selection,
//! reservation and locking modules: token identifiers, transaction outputs
//! requested by a caller, and helpers around `(transactionId, outputIndex)`
//! references.
//!
//! # Usage
//!
//! ```
//! use headless_common::types::{TokenId, TxOutput, sum_by_token};
//!
//! let outputs = vec![
//!     TxOutput::new("WPhehTyNHTPz954CskfuSgLEfuKXbXeK3f", 10, TokenId::native()),
//!     TxOutput::new("WPhehTyNHTPz954CskfuSgLEfuKXbXeK3f", 5, TokenId::native()),
//! ];
//! let sums = sum_by_token(&outputs).unwrap();
//! assert_eq!(sums, vec![(TokenId::native(), 15)]);
//! ```

use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Identifier of the chain's native token
pub const NATIVE_TOKEN_UID: &str = "00";

/// Length in bytes of a custom token uid
pub const TOKEN_UID_LENGTH: usize = 32;

/// Token identifier
///
/// Either the native token (`"00"`) or a 32-byte custom token uid encoded as
/// lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(String);

impl TokenId {
    /// The native token
    pub fn native() -> Self {
        TokenId(NATIVE_TOKEN_UID.to_string())
    }

    /// Parse a token uid, normalizing hex to lowercase
    pub fn parse(uid: &str) -> CoreResult<Self> {
        let uid = uid.trim().to_lowercase();
        if uid == NATIVE_TOKEN_UID {
            return Ok(Self::native());
        }

        let bytes = hex::decode(&uid)
            .map_err(|e| CoreError::validation(format!("Invalid token uid {}: {}", uid, e)))?;
        if bytes.len() != TOKEN_UID_LENGTH {
            return Err(CoreError::validation(format!(
                "Invalid token uid {}: expected {} bytes, got {}",
                uid,
                TOKEN_UID_LENGTH,
                bytes.len()
            )));
        }

        Ok(TokenId(uid))
    }

    pub fn is_native(&self) -> bool {
        self.0 == NATIVE_TOKEN_UID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::native()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TokenId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TokenId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TokenId> for String {
    fn from(token: TokenId) -> Self {
        token.0
    }
}

/// An output requested by a caller of a send-style operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Destination address
    pub address: String,
    /// Value in the token's smallest unit
    pub value: u64,
    /// Token being sent (native token when omitted)
    #[serde(default)]
    pub token: TokenId,
}

impl TxOutput {
    pub fn new(address: impl Into<String>, value: u64, token: TokenId) -> Self {
        Self {
            address: address.into(),
            value,
            token,
        }
    }
}

/// Sum the requested output values per token
///
/// Tokens are returned in the order they first appear in `outputs`, which is
/// the order in which inputs are selected for them.
pub fn sum_by_token(outputs: &[TxOutput]) -> CoreResult<Vec<(TokenId, u64)>> {
    let mut sums: Vec<(TokenId, u64)> = Vec::new();

    for output in outputs {
        match sums.iter_mut().find(|(token, _)| *token == output.token) {
            Some((_, amount)) => {
                *amount = amount.checked_add(output.value).ok_or_else(|| {
                    CoreError::validation(format!(
                        "Output values for token {} overflow",
                        output.token
                    ))
                })?;
            }
            None => sums.push((output.token.clone(), output.value)),
        }
    }

    Ok(sums)
}

/// Build an outpoint from a transaction id string and output index
pub fn parse_outpoint(tx_id: &str, index: u32) -> CoreResult<OutPoint> {
    let txid = Txid::from_str(tx_id)
        .map_err(|e| CoreError::validation(format!("Invalid transaction id {}: {}", tx_id, e)))?;
    Ok(OutPoint::new(txid, index))
}

/// Stable string id for an outpoint (`txid:index`)
pub fn outpoint_id(outpoint: &OutPoint) -> String {
    format!("{}:{}", outpoint.txid, outpoint.vout)
}
