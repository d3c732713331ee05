use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bridge::service::{Bridge, BridgeStats};
use crate::db::models::{DepositRecord, HistoryRow, Totals, WithdrawalRecord, WithdrawalStatus};
use crate::queue::settlement::{SettlementResult, SweepReport};
use crate::utils::amount::micros_to_decimal;

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    #[serde(default, alias = "tx_signature", alias = "tx_hash")]
    pub tx_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    #[serde(default)]
    pub to_address: String,
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DepositView {
    pub tx_reference: String,
    pub sender_address: String,
    pub reserve_address: String,
    pub token_id: String,
    pub amount_raw: String,
    pub amount_wrtc: f64,
    pub ordering_marker: Option<i64>,
    pub block_time: Option<i64>,
    pub created_at_ms: i64,
}

impl From<&DepositRecord> for DepositView {
    fn from(deposit: &DepositRecord) -> Self {
        Self {
            tx_reference: deposit.tx_reference.clone(),
            sender_address: deposit.sender_address.clone(),
            reserve_address: deposit.reserve_address.clone(),
            token_id: deposit.token_id.clone(),
            amount_raw: deposit.amount_raw.clone(),
            amount_wrtc: micros_to_decimal(deposit.amount_micros),
            ordering_marker: deposit.ordering_marker,
            block_time: deposit.block_time,
            created_at_ms: deposit.created_at_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub ok: bool,
    pub idempotent: bool,
    pub deposit: DepositView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credited_rtc: Option<f64>,
    pub new_rtc_balance: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WithdrawalView {
    pub withdrawal_id: String,
    pub to_address: String,
    pub amount_wrtc: f64,
    pub fee_wrtc: f64,
    pub status: String,
    pub tx_reference: Option<String>,
    pub created_at_ms: i64,
}

impl From<&WithdrawalRecord> for WithdrawalView {
    fn from(withdrawal: &WithdrawalRecord) -> Self {
        Self {
            withdrawal_id: withdrawal.withdrawal_id.clone(),
            to_address: withdrawal.to_address.clone(),
            amount_wrtc: micros_to_decimal(withdrawal.amount_micros),
            fee_wrtc: micros_to_decimal(withdrawal.fee_micros),
            status: withdrawal.status.to_string(),
            tx_reference: withdrawal.tx_reference.clone(),
            created_at_ms: withdrawal.created_at_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub ok: bool,
    pub withdrawal: WithdrawalView,
    pub new_rtc_balance: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub reference_id: String,
    pub counterparty: String,
    pub amount_wrtc: f64,
    pub fee_wrtc: f64,
    pub status: String,
    pub tx_reference: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
    pub created_at_ms: i64,
}

impl From<HistoryRow> for HistoryItem {
    fn from(row: HistoryRow) -> Self {
        Self {
            kind: row.kind,
            reference_id: row.reference,
            counterparty: row.counterparty,
            amount_wrtc: micros_to_decimal(row.amount_micros),
            fee_wrtc: micros_to_decimal(row.fee_micros),
            status: row.status,
            tx_reference: row.tx_reference,
            note: row.note,
            created_at_ms: row.created_at_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub ok: bool,
    pub history: Vec<HistoryItem>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TotalsView {
    pub count: i64,
    pub total_wrtc: f64,
}

impl From<Totals> for TotalsView {
    fn from(totals: Totals) -> Self {
        Self {
            count: totals.count,
            total_wrtc: micros_to_decimal(totals.sum_micros),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LimitsView {
    pub min_deposit: f64,
    pub min_withdraw: f64,
    pub max_withdraw: f64,
    pub withdraw_fee: f64,
    pub withdraw_cooldown_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub ok: bool,
    pub bridge: String,
    pub chain: String,
    pub network: String,
    pub token_id: String,
    pub token_decimals: u32,
    pub reserve_wallet: String,
    pub confirmations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buy_url: Option<String>,
    pub limits: LimitsView,
    pub settlement_enabled: bool,
    pub deposits: TotalsView,
    pub withdrawals: TotalsView,
}

impl InfoResponse {
    pub fn new(bridge: &Bridge, stats: &BridgeStats, settlement_enabled: bool) -> Self {
        Self {
            ok: true,
            bridge: bridge.slug.clone(),
            chain: bridge.chain.to_string(),
            network: bridge.network.clone(),
            token_id: bridge.token_id.clone(),
            token_decimals: bridge.token_decimals,
            reserve_wallet: bridge.reserve_address.clone(),
            confirmations: bridge.confirmations,
            buy_url: bridge.buy_url.clone(),
            limits: LimitsView {
                min_deposit: micros_to_decimal(bridge.min_deposit_micros),
                min_withdraw: micros_to_decimal(bridge.min_withdraw_micros),
                max_withdraw: micros_to_decimal(bridge.max_withdraw_micros),
                withdraw_fee: micros_to_decimal(bridge.withdraw_fee_micros),
                withdraw_cooldown_secs: bridge.withdraw_cooldown_secs,
            },
            settlement_enabled,
            deposits: stats.deposits.into(),
            withdrawals: stats.active_withdrawals().into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StatusView {
    pub count: i64,
    pub total_wrtc: f64,
    pub fees_wrtc: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub ok: bool,
    pub deposits: TotalsView,
    pub withdrawals: BTreeMap<String, StatusView>,
    /// Debited but not yet paid out or failed.
    pub pending_wrtc: f64,
}

impl From<&BridgeStats> for StatsResponse {
    fn from(stats: &BridgeStats) -> Self {
        let withdrawals = stats
            .withdrawals
            .iter()
            .map(|w| {
                (
                    w.status.to_string(),
                    StatusView {
                        count: w.count,
                        total_wrtc: micros_to_decimal(w.sum_micros),
                        fees_wrtc: micros_to_decimal(w.fee_micros),
                    },
                )
            })
            .collect();
        let pending_micros: i64 = stats
            .withdrawals
            .iter()
            .filter(|w| {
                matches!(
                    w.status,
                    WithdrawalStatus::Queued | WithdrawalStatus::Processing
                )
            })
            .map(|w| w.sum_micros)
            .sum();

        Self {
            ok: true,
            deposits: stats.deposits.into(),
            withdrawals,
            pending_wrtc: micros_to_decimal(pending_micros),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub ok: bool,
    pub processed: usize,
    pub results: Vec<SettlementResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

impl From<SweepReport> for SettlementResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            ok: true,
            processed: report.results.len(),
            results: report.results,
            halted: report.halted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub bridges: Vec<String>,
}
