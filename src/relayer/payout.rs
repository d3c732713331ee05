use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

use crate::chain::rpc::{RpcError, RpcErrorKind};

/// JSON-RPC codes that mean the node refused the transaction itself:
/// invalid request or params, transaction rejected, execution reverted.
const REJECTED_CODES: [i64; 4] = [-32600, -32602, -32003, 3];

/// Codes a node uses when it is throttling or temporarily unavailable.
const TRANSIENT_CODES: [i64; 3] = [-32005, -32603, 429];

/// Failure of a payout call, classified at the executor boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayoutError {
    /// The chain refused the transfer. Retrying sends the same thing again.
    #[error("payout rejected: {0}")]
    Rejected(String),

    /// Transport, timeout or rate limit. Safe to retry later.
    #[error("payout temporarily unavailable: {0}")]
    Transient(String),

    /// An error the executor has no mapping for. Retried, never treated as final.
    #[error("payout failed with unclassified error: {0}")]
    Unknown(String),
}

impl PayoutError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, PayoutError::Rejected(_))
    }

    pub fn from_rpc(err: RpcError) -> Self {
        let message = err.to_string();
        match err.kind {
            RpcErrorKind::Transport | RpcErrorKind::Timeout => PayoutError::Transient(message),
            RpcErrorKind::Provider(code) if REJECTED_CODES.contains(&code) => {
                PayoutError::Rejected(message)
            }
            RpcErrorKind::Provider(code) if TRANSIENT_CODES.contains(&code) => {
                PayoutError::Transient(message)
            }
            RpcErrorKind::Provider(_) | RpcErrorKind::Malformed => PayoutError::Unknown(message),
        }
    }
}

impl From<RpcError> for PayoutError {
    fn from(err: RpcError) -> Self {
        PayoutError::from_rpc(err)
    }
}

/// Outcome of a submitted payout as seen on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutStatus {
    /// No receipt yet.
    Pending,
    Confirmed,
    Reverted,
}

/// Sends token payouts from the bridge's hot wallet.
#[automock]
#[async_trait]
pub trait PayoutExecutor: Send + Sync {
    /// Raw token balance of the hot wallet.
    async fn available_balance(&self) -> Result<u128, PayoutError>;

    /// Submits a transfer of `amount_raw` to `to_address` and returns its
    /// transaction reference without waiting for inclusion.
    async fn submit(&self, to_address: &str, amount_raw: u128) -> Result<String, PayoutError>;

    async fn status(&self, tx_reference: &str) -> Result<PayoutStatus, PayoutError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classification_is_by_kind_and_code() {
        assert_eq!(
            PayoutError::from_rpc(RpcError::provider(3, "execution reverted")),
            PayoutError::Rejected("provider error 3: execution reverted".into())
        );
        assert!(PayoutError::from_rpc(RpcError::provider(-32602, "bad params")).is_permanent());
        assert!(matches!(
            PayoutError::from_rpc(RpcError::provider(-32005, "limit exceeded")),
            PayoutError::Transient(_)
        ));
        assert!(matches!(
            PayoutError::from_rpc(RpcError::timeout(Duration::from_secs(5))),
            PayoutError::Transient(_)
        ));
        assert!(matches!(
            PayoutError::from_rpc(RpcError::transport("connection refused")),
            PayoutError::Transient(_)
        ));
    }

    #[test]
    fn test_unmapped_errors_are_retryable() {
        // Message text does not influence classification.
        let err = PayoutError::from_rpc(RpcError::provider(-32000, "execution reverted"));
        assert!(matches!(err, PayoutError::Unknown(_)));
        assert!(!err.is_permanent());
        assert!(!PayoutError::from_rpc(RpcError::malformed("garbage")).is_permanent());
    }
}
