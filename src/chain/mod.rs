//! On-chain transfer verification.
//!
//! Each supported chain family turns a transaction reference into a
//! [`TransferDescriptor`]: how much of the canonical token moved into the
//! reserve wallet, and who sent it.

pub mod evm;
pub mod rpc;
pub mod solana;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::utils::amount::{raw_to_decimal, u128_string};
use rpc::RpcError;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Chain family a bridge runs on. Decides reference and address formats and
/// which verifier is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Solana,
    Evm,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Solana => "solana",
            ChainKind::Evm => "evm",
        }
    }

    /// Validates a transaction reference and returns its canonical form:
    /// a base58 signature for Solana, lowercase `0x` + 64 hex for EVM.
    pub fn normalize_reference(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        match self {
            ChainKind::Solana => {
                (is_base58(raw) && (32..=88).contains(&raw.len())).then(|| raw.to_string())
            }
            ChainKind::Evm => is_prefixed_hex(raw, 64).then(|| raw.to_ascii_lowercase()),
        }
    }

    /// Validates a wallet address and returns its canonical form.
    pub fn normalize_address(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        match self {
            ChainKind::Solana => {
                (is_base58(raw) && (32..=44).contains(&raw.len())).then(|| raw.to_string())
            }
            ChainKind::Evm => is_prefixed_hex(raw, 40).then(|| raw.to_ascii_lowercase()),
        }
    }

    /// Compares two addresses after normalization. Invalid addresses never match.
    pub fn same_address(&self, a: &str, b: &str) -> bool {
        match (self.normalize_address(a), self.normalize_address(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solana" | "sol" => Ok(ChainKind::Solana),
            "evm" | "base" | "ethereum" | "eth" => Ok(ChainKind::Evm),
            other => Err(format!("unsupported chain '{}'", other)),
        }
    }
}

fn is_base58(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| BASE58_ALPHABET.contains(c))
}

fn is_prefixed_hex(s: &str, hex_len: usize) -> bool {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(body) => body.len() == hex_len && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// A verified canonical-token transfer into the reserve wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub reference: String,
    pub token_id: String,
    pub reserve_address: String,
    pub sender_address: String,
    #[serde(with = "u128_string")]
    pub amount_raw: u128,
    pub decimals: u32,
    /// Slot (Solana) or block number (EVM).
    pub ordering_marker: Option<u64>,
    pub block_time: Option<i64>,
}

impl TransferDescriptor {
    pub fn amount(&self) -> f64 {
        raw_to_decimal(self.amount_raw, self.decimals)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("Malformed transaction reference")]
    MalformedReference,

    #[error("Chain RPC request failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Transaction not found or not finalized yet")]
    NotFound,

    #[error("Transaction failed on-chain: {0}")]
    FailedOnChain(String),

    #[error("Transaction needs more confirmations ({confirmations}/{required}). Try again shortly.")]
    InsufficientConfirmations { confirmations: u64, required: u64 },

    #[error("Could not determine confirmation depth ({0}). Try again shortly.")]
    ConfirmationUnavailable(RpcError),

    #[error("No canonical token transfer found in transaction")]
    NonCanonicalToken,

    #[error("Canonical token transfer to reserve wallet not found")]
    NoReserveCredit,

    #[error("Could not determine sender address for canonical transfer")]
    SenderUnknown,

    #[error("Ambiguous sender: {0} addresses share the largest canonical token decrease")]
    AmbiguousSender(usize),

    #[error("Malformed chain response: {0}")]
    MalformedResponse(String),
}

#[automock]
#[async_trait]
pub trait TransferVerifier: Send + Sync {
    /// Verifies `reference` (already normalized) and describes the canonical
    /// transfer it contains.
    async fn verify(&self, reference: &str) -> Result<TransferDescriptor, VerifyError>;
}

/// Net canonical-token movement attributed to the reserve and to its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attribution {
    pub reserve_credit: u128,
    pub sender: String,
}

/// Resolves per-owner net deltas (`post - pre`) into the reserve credit and
/// the sender. The sender is the non-reserve owner with the single largest
/// decrease; `ignored` owners (e.g. the EVM zero address) never qualify.
pub(crate) fn attribute(
    deltas: &BTreeMap<String, i128>,
    reserve: &str,
    ignored: &[&str],
) -> Result<Attribution, VerifyError> {
    let reserve_delta = deltas.get(reserve).copied().unwrap_or(0);
    if reserve_delta <= 0 {
        return Err(VerifyError::NoReserveCredit);
    }

    let decreases: Vec<(&String, i128)> = deltas
        .iter()
        .filter(|(owner, _)| owner.as_str() != reserve && !ignored.contains(&owner.as_str()))
        .filter(|(_, delta)| **delta < 0)
        .map(|(owner, delta)| (owner, -*delta))
        .collect();

    let largest = decreases
        .iter()
        .map(|(_, dec)| *dec)
        .max()
        .ok_or(VerifyError::SenderUnknown)?;
    let leaders: Vec<&String> = decreases
        .iter()
        .filter(|(_, dec)| *dec == largest)
        .map(|(owner, _)| *owner)
        .collect();
    if leaders.len() > 1 {
        return Err(VerifyError::AmbiguousSender(leaders.len()));
    }

    Ok(Attribution {
        reserve_credit: reserve_delta as u128,
        sender: leaders[0].clone(),
    })
}
