use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, trace, warn};

use crate::bridge::service::Bridge;
use crate::config::SettlementConfig;
use crate::db::database::{
    claim_withdrawal, mark_failed, mark_sent, note_retry, record_submission, release_lease,
    renew_lease, settleable_withdrawals, try_acquire_lease,
};
use crate::db::models::{WithdrawalRecord, WithdrawalStatus};
use crate::relayer::payout::{PayoutError, PayoutExecutor, PayoutStatus};
use crate::utils::amount::micros_to_raw;
use crate::utils::hash::generate_holder_id;
use crate::utils::time::now_ms;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),
}

/// What happened to one withdrawal during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementResult {
    pub withdrawal_id: String,
    pub status: WithdrawalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub lease_acquired: bool,
    pub results: Vec<SettlementResult>,
    /// Why the run stopped before the end of the batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

/// Settles queued withdrawals of one bridge. Any number of instances may
/// run; the per-bridge lease lets only one of them work at a time.
pub struct SettlementSweep {
    pool: SqlitePool,
    bridge: Arc<Bridge>,
    executor: Arc<dyn PayoutExecutor>,
    config: SettlementConfig,
    holder: String,
    /// Held for the whole of `process_once`. The periodic loop and the
    /// admin endpoint share one instance and therefore one lease holder.
    running: Mutex<()>,
}

impl SettlementSweep {
    pub fn new(
        pool: SqlitePool,
        bridge: Arc<Bridge>,
        executor: Arc<dyn PayoutExecutor>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            pool,
            bridge,
            executor,
            config,
            holder: generate_holder_id(),
            running: Mutex::new(()),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Runs the sweep in an infinite loop.
    pub async fn run(&self) {
        loop {
            match self.process_once().await {
                Ok(report) if !report.lease_acquired => {
                    trace!("[{}] Settlement lease held elsewhere", self.bridge.slug)
                }
                Ok(report) => info!(
                    "[{}] Completed settlement cycle: {} withdrawals handled",
                    self.bridge.slug,
                    report.results.len()
                ),
                Err(e) => error!("[{}] Settlement cycle failed: {:?}", self.bridge.slug, e),
            }
            sleep(Duration::from_secs(self.config.interval_secs)).await;
        }
    }

    fn lease_ttl_ms(&self) -> i64 {
        i64::try_from(self.config.lease_ttl_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000)
    }

    /// One leased pass over the queue. Reports `lease_acquired: false` when
    /// another run, here or elsewhere, is already working.
    pub async fn process_once(&self) -> Result<SweepReport, SettlementError> {
        let Ok(_running) = self.running.try_lock() else {
            return Ok(SweepReport::default());
        };

        let slug = &self.bridge.slug;
        let started_ms = now_ms();
        if !try_acquire_lease(&self.pool, slug, &self.holder, self.lease_ttl_ms()).await? {
            return Ok(SweepReport::default());
        }

        let outcome = self.process_batch(started_ms).await;

        if let Err(e) = release_lease(&self.pool, slug, &self.holder).await {
            warn!("[{}] Failed to release settlement lease: {}", slug, e);
        }
        outcome
    }

    /// Rows in `processing` last touched after `started_ms` belong to a run
    /// that overlapped this one and are left alone.
    async fn process_batch(&self, started_ms: i64) -> Result<SweepReport, SettlementError> {
        let mut report = SweepReport {
            lease_acquired: true,
            ..SweepReport::default()
        };

        let rows = settleable_withdrawals(&self.pool, &self.bridge.slug, self.config.batch_size).await?;
        if rows.is_empty() {
            return Ok(report);
        }

        let mut available = match self.executor.available_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("[{}] Hot wallet balance unavailable: {}", self.bridge.slug, e);
                report.halted = Some(format!("hot wallet balance unavailable: {}", e));
                return Ok(report);
            }
        };

        for row in rows {
            if !renew_lease(&self.pool, &self.bridge.slug, &self.holder, self.lease_ttl_ms()).await? {
                warn!("[{}] Settlement lease lost, stopping run", self.bridge.slug);
                report.halted = Some("settlement lease lost".to_string());
                break;
            }

            if row.tx_reference.is_none() {
                if let Ok(amount_raw) = micros_to_raw(row.amount_micros, self.bridge.token_decimals) {
                    if amount_raw > available {
                        let reason = format!(
                            "hot wallet balance {} below payout {}",
                            available, amount_raw
                        );
                        warn!("[{}] Halting sweep: {}", self.bridge.slug, reason);
                        report.halted = Some(reason);
                        break;
                    }
                }
            }

            let Some(claimed) = claim_withdrawal(&self.pool, row.id, started_ms).await? else {
                continue;
            };

            // A recorded reference means the payout may already be on-chain.
            if let Some(tx_reference) = claimed.tx_reference.clone() {
                report
                    .results
                    .push(self.await_outcome(&claimed, &tx_reference).await?);
                continue;
            }

            let amount_raw = match micros_to_raw(claimed.amount_micros, self.bridge.token_decimals) {
                Ok(raw) => raw,
                Err(e) => {
                    report.results.push(self.fail(&claimed, &e.to_string()).await?);
                    continue;
                }
            };

            match self.executor.submit(&claimed.to_address, amount_raw).await {
                Ok(tx_reference) => {
                    available = available.saturating_sub(amount_raw);
                    if !record_submission(&self.pool, claimed.id, &tx_reference).await? {
                        error!(
                            "[{}] Withdrawal {} already has a payout reference, {} not recorded",
                            self.bridge.slug, claimed.withdrawal_id, tx_reference
                        );
                        continue;
                    }
                    report
                        .results
                        .push(self.await_outcome(&claimed, &tx_reference).await?);
                }
                Err(e) if e.is_permanent() => {
                    report.results.push(self.fail(&claimed, &e.to_string()).await?);
                }
                Err(e) => {
                    report
                        .results
                        .push(self.retry_later(&claimed, &e.to_string()).await?);
                }
            }
        }

        Ok(report)
    }

    /// Polls the payout receipt until it resolves or the wait runs out.
    async fn await_outcome(
        &self,
        row: &WithdrawalRecord,
        tx_reference: &str,
    ) -> Result<SettlementResult, SettlementError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.receipt_timeout_secs);
        loop {
            match self.executor.status(tx_reference).await {
                Ok(PayoutStatus::Confirmed) => {
                    mark_sent(&self.pool, row.id, tx_reference).await?;
                    info!(
                        "[{}] Withdrawal {} sent in {}",
                        self.bridge.slug, row.withdrawal_id, tx_reference
                    );
                    return Ok(SettlementResult {
                        withdrawal_id: row.withdrawal_id.clone(),
                        status: WithdrawalStatus::Sent,
                        tx_reference: Some(tx_reference.to_string()),
                        reason: None,
                    });
                }
                Ok(PayoutStatus::Reverted) => {
                    let mut result = self.fail(row, "tx reverted").await?;
                    result.tx_reference = Some(tx_reference.to_string());
                    return Ok(result);
                }
                Ok(PayoutStatus::Pending) if Instant::now() >= deadline => {
                    let reason = format!(
                        "receipt for {} not available after {}s",
                        tx_reference, self.config.receipt_timeout_secs
                    );
                    let mut result = self.retry_later(row, &reason).await?;
                    result.tx_reference = Some(tx_reference.to_string());
                    return Ok(result);
                }
                Ok(PayoutStatus::Pending) => {
                    sleep(Duration::from_millis(self.config.receipt_poll_ms)).await;
                }
                Err(e) => {
                    let mut result = self.retry_later(row, &e.to_string()).await?;
                    result.tx_reference = Some(tx_reference.to_string());
                    return Ok(result);
                }
            }
        }
    }

    async fn fail(
        &self,
        row: &WithdrawalRecord,
        reason: &str,
    ) -> Result<SettlementResult, SettlementError> {
        error!(
            "[{}] Withdrawal {} failed permanently: {}",
            self.bridge.slug, row.withdrawal_id, reason
        );
        mark_failed(&self.pool, row.id, reason).await?;
        Ok(SettlementResult {
            withdrawal_id: row.withdrawal_id.clone(),
            status: WithdrawalStatus::Failed,
            tx_reference: None,
            reason: Some(reason.to_string()),
        })
    }

    async fn retry_later(
        &self,
        row: &WithdrawalRecord,
        reason: &str,
    ) -> Result<SettlementResult, SettlementError> {
        warn!(
            "[{}] Withdrawal {} left for the next run: {}",
            self.bridge.slug, row.withdrawal_id, reason
        );
        note_retry(&self.pool, row.id, reason).await?;
        Ok(SettlementResult {
            withdrawal_id: row.withdrawal_id.clone(),
            status: WithdrawalStatus::Processing,
            tx_reference: None,
            reason: Some(reason.to_string()),
        })
    }
}
