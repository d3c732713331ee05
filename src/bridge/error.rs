use thiserror::Error;

use crate::chain::VerifyError;
use crate::utils::amount::AmountError;

/// Why a bridge operation was refused.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    MalformedReference(String),

    #[error("{0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Destination address and positive amount required")]
    NonPositiveAmount,

    #[error("Transaction already claimed by another account")]
    AlreadyClaimed,

    #[error("Verification failed: {0}")]
    Verification(#[from] VerifyError),

    #[error("Transfer was not sent to the bridge reserve wallet")]
    WrongDestination { expected: String, got: String },

    #[error("No {chain} wallet bound to account. Bind your wallet before deposit verification.")]
    NoBoundWallet { chain: String },

    #[error("Sender wallet does not match the account's verified {chain} wallet")]
    SenderMismatch {
        chain: String,
        expected: String,
        onchain: String,
    },

    #[error("Minimum deposit is {minimum} wRTC")]
    BelowMinimumDeposit { minimum: f64, amount: f64 },

    #[error("Minimum withdrawal is {minimum} wRTC")]
    BelowMinimumWithdrawal { minimum: f64 },

    #[error("Maximum withdrawal is {maximum} wRTC")]
    AboveMaximumWithdrawal { maximum: f64 },

    #[error("Withdrawal cooldown active. Try again in {remaining_secs}s.")]
    CooldownActive { remaining_secs: u64 },

    #[error("Insufficient RTC balance")]
    InsufficientBalance { balance: f64, required: f64 },

    #[error("Account not found")]
    AccountNotFound,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
