use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::utils::amount::micros_to_decimal;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub balance_micros: i64,
    pub created_at_ms: i64,
}

impl Account {
    pub fn balance(&self) -> f64 {
        micros_to_decimal(self.balance_micros)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct BoundWallet {
    pub account_id: i64,
    pub chain: String,
    pub address: String,
    pub bound_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Queued,
    Processing,
    Sent,
    /// Older rows wrote `completed` for a paid-out withdrawal.
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub const ALL: [WithdrawalStatus; 4] = [
        WithdrawalStatus::Queued,
        WithdrawalStatus::Processing,
        WithdrawalStatus::Sent,
        WithdrawalStatus::Failed,
    ];

    /// Folds the legacy `completed` value into `sent`.
    pub fn canonical(self) -> Self {
        match self {
            WithdrawalStatus::Completed => WithdrawalStatus::Sent,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.canonical() {
            WithdrawalStatus::Queued => "queued",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Sent | WithdrawalStatus::Completed => "sent",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DepositRecord {
    pub id: i64,
    pub bridge: String,
    pub tx_reference: String,
    pub account_id: i64,
    pub sender_address: String,
    pub reserve_address: String,
    pub token_id: String,
    pub amount_raw: String,
    pub amount_micros: i64,
    pub ordering_marker: Option<i64>,
    pub block_time: Option<i64>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct NewDeposit<'a> {
    pub bridge: &'a str,
    pub tx_reference: &'a str,
    pub account_id: i64,
    pub sender_address: &'a str,
    pub reserve_address: &'a str,
    pub token_id: &'a str,
    pub amount_raw: u128,
    pub amount_micros: i64,
    pub ordering_marker: Option<u64>,
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct WithdrawalRecord {
    pub id: i64,
    pub withdrawal_id: String,
    pub bridge: String,
    pub account_id: i64,
    pub to_address: String,
    pub amount_micros: i64,
    pub fee_micros: i64,
    pub status: WithdrawalStatus,
    pub tx_reference: Option<String>,
    pub note: String,
    pub attempts: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl WithdrawalRecord {
    pub fn total_debit_micros(&self) -> i64 {
        self.amount_micros + self.fee_micros
    }
}

#[derive(Debug, Clone)]
pub struct NewWithdrawal<'a> {
    pub withdrawal_id: &'a str,
    pub bridge: &'a str,
    pub account_id: i64,
    pub to_address: &'a str,
    pub amount_micros: i64,
    pub fee_micros: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Deposit,
    Withdrawal,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Deposit => "deposit",
            LedgerKind::Withdrawal => "withdrawal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: i64,
    pub bridge: String,
    pub kind: String,
    pub reference: String,
    pub delta_micros: i64,
    pub balance_after_micros: i64,
    pub created_at_ms: i64,
}

/// One row of the merged deposit/withdrawal history.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct HistoryRow {
    pub kind: String,
    pub id: i64,
    pub reference: String,
    pub counterparty: String,
    pub amount_micros: i64,
    pub fee_micros: i64,
    pub status: String,
    pub tx_reference: Option<String>,
    pub note: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct Totals {
    pub count: i64,
    pub sum_micros: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StatusTotals {
    pub status: WithdrawalStatus,
    pub count: i64,
    pub sum_micros: i64,
    pub fee_micros: i64,
}
