use sqlx::{SqliteExecutor, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::BridgeError;
use crate::chain::{ChainKind, TransferDescriptor, TransferVerifier, VerifyError};
use crate::config::BridgeConfig;
use crate::db::database::{self, is_unique_violation};
use crate::db::models::{
    Account, DepositRecord, HistoryRow, LedgerKind, NewDeposit, NewWithdrawal, StatusTotals,
    Totals, WithdrawalRecord, WithdrawalStatus,
};
use crate::utils::amount::{
    decimal_to_micros, micros_to_decimal, micros_to_raw, raw_to_micros, AmountError,
};
use crate::utils::hash::generate_withdrawal_id;
use crate::utils::time::now_ms;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;

/// Validated, normalized settings of one bridge. Limits are in micro-RTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub slug: String,
    pub chain: ChainKind,
    pub network: String,
    pub token_id: String,
    pub token_decimals: u32,
    pub reserve_address: String,
    pub confirmations: u64,
    pub min_deposit_micros: i64,
    pub min_withdraw_micros: i64,
    pub max_withdraw_micros: i64,
    pub withdraw_fee_micros: i64,
    pub withdraw_cooldown_secs: u64,
    pub withdrawal_id_prefix: String,
    pub buy_url: Option<String>,
}

impl Bridge {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let chain = config.chain;
        let token_id = chain
            .normalize_address(&config.token_id)
            .ok_or_else(|| BridgeError::InvalidAddress(format!("Invalid {} token id", chain)))?;
        let reserve_address = chain.normalize_address(&config.reserve_address).ok_or_else(|| {
            BridgeError::InvalidAddress(format!("Invalid {} reserve address", chain))
        })?;

        Ok(Self {
            slug: config.slug.clone(),
            chain,
            network: config.network.clone(),
            token_id,
            token_decimals: config.token_decimals,
            reserve_address,
            confirmations: config.confirmations,
            min_deposit_micros: decimal_to_micros(config.min_deposit)?,
            min_withdraw_micros: decimal_to_micros(config.min_withdraw)?,
            max_withdraw_micros: decimal_to_micros(config.max_withdraw)?,
            withdraw_fee_micros: decimal_to_micros(config.withdraw_fee)?,
            withdraw_cooldown_secs: config.withdraw_cooldown_secs,
            withdrawal_id_prefix: config.withdrawal_id_prefix.clone(),
            buy_url: config.buy_url.clone(),
        })
    }

    fn malformed_reference(&self) -> BridgeError {
        BridgeError::MalformedReference(match self.chain {
            ChainKind::Evm => "tx_hash required (0x-prefixed, 66 chars)".to_string(),
            ChainKind::Solana => "tx_signature is required".to_string(),
        })
    }

    fn invalid_destination(&self) -> BridgeError {
        BridgeError::InvalidAddress(match self.chain {
            ChainKind::Evm => {
                "Valid Base/Ethereum destination address required (0x + 40 hex)".to_string()
            }
            ChainKind::Solana => "Valid Solana destination address is required".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DepositOutcome {
    /// First successful claim of the reference.
    Credited {
        deposit: DepositRecord,
        transfer: TransferDescriptor,
        new_balance_micros: i64,
    },
    /// The reference was already credited to this account.
    Idempotent {
        deposit: DepositRecord,
        balance_micros: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalOutcome {
    pub withdrawal: WithdrawalRecord,
    pub new_balance_micros: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    pub deposits: Totals,
    /// One entry per status, in lifecycle order.
    pub withdrawals: Vec<StatusTotals>,
}

impl BridgeStats {
    /// Withdrawals that have not failed, i.e. debited and owed on-chain.
    pub fn active_withdrawals(&self) -> Totals {
        self.withdrawals
            .iter()
            .filter(|w| w.status != WithdrawalStatus::Failed)
            .fold(Totals::default(), |acc, w| Totals {
                count: acc.count + w.count,
                sum_micros: acc.sum_micros + w.sum_micros,
            })
    }
}

/// Deposit, withdrawal and read operations of one bridge.
pub struct BridgeService {
    pool: SqlitePool,
    bridge: Arc<Bridge>,
    verifier: Arc<dyn TransferVerifier>,
}

impl BridgeService {
    pub fn new(pool: SqlitePool, bridge: Arc<Bridge>, verifier: Arc<dyn TransferVerifier>) -> Self {
        Self {
            pool,
            bridge,
            verifier,
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Verifies an on-chain transfer and credits it to `account` once.
    pub async fn deposit(
        &self,
        account: &Account,
        raw_reference: &str,
    ) -> Result<DepositOutcome, BridgeError> {
        let bridge = &self.bridge;
        let reference = bridge
            .chain
            .normalize_reference(raw_reference)
            .ok_or_else(|| bridge.malformed_reference())?;

        if let Some(existing) = database::find_deposit(&self.pool, &bridge.slug, &reference).await? {
            return self.existing_deposit(account, existing).await;
        }

        let transfer = self.verifier.verify(&reference).await?;
        debug!(
            "[{}] Verified {}: {} raw from {}",
            bridge.slug, reference, transfer.amount_raw, transfer.sender_address
        );

        if !bridge
            .chain
            .same_address(&transfer.reserve_address, &bridge.reserve_address)
        {
            return Err(BridgeError::WrongDestination {
                expected: bridge.reserve_address.clone(),
                got: transfer.reserve_address.clone(),
            });
        }
        if !bridge.chain.same_address(&transfer.token_id, &bridge.token_id) {
            return Err(BridgeError::Verification(VerifyError::NonCanonicalToken));
        }

        let chain = bridge.chain.as_str();
        let expected = database::bound_wallet(&self.pool, account.id, chain)
            .await?
            .ok_or_else(|| BridgeError::NoBoundWallet {
                chain: chain.to_string(),
            })?;
        if !bridge.chain.same_address(&expected, &transfer.sender_address) {
            warn!(
                "[{}] Sender mismatch on {} for account {}: bound {}, on-chain {}",
                bridge.slug, reference, account.id, expected, transfer.sender_address
            );
            return Err(BridgeError::SenderMismatch {
                chain: chain.to_string(),
                expected,
                onchain: transfer.sender_address.clone(),
            });
        }

        let amount_micros = raw_to_micros(transfer.amount_raw, transfer.decimals)?;
        if amount_micros < bridge.min_deposit_micros.max(1) {
            return Err(BridgeError::BelowMinimumDeposit {
                minimum: micros_to_decimal(bridge.min_deposit_micros),
                amount: micros_to_decimal(amount_micros),
            });
        }

        let new_deposit = NewDeposit {
            bridge: &bridge.slug,
            tx_reference: &reference,
            account_id: account.id,
            sender_address: &transfer.sender_address,
            reserve_address: &transfer.reserve_address,
            token_id: &transfer.token_id,
            amount_raw: transfer.amount_raw,
            amount_micros,
            ordering_marker: transfer.ordering_marker,
            block_time: transfer.block_time,
        };

        let mut tx = self.pool.begin().await?;
        let deposit = match database::insert_deposit(&mut *tx, &new_deposit).await {
            Ok(deposit) => deposit,
            Err(e) if is_unique_violation(&e) => {
                // Lost a race against a concurrent claim of the same reference.
                tx.rollback().await?;
                let existing = database::find_deposit(&self.pool, &bridge.slug, &reference)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                return self.existing_deposit(account, existing).await;
            }
            Err(e) => return Err(e.into()),
        };
        let new_balance_micros = database::credit_account(&mut *tx, account.id, amount_micros)
            .await?
            .ok_or(BridgeError::AccountNotFound)?;
        database::append_ledger_entry(
            &mut *tx,
            account.id,
            &bridge.slug,
            LedgerKind::Deposit,
            &reference,
            amount_micros,
            new_balance_micros,
        )
        .await?;
        tx.commit().await?;

        info!(
            "[{}] Credited {} micro-RTC to account {} for {}",
            bridge.slug, amount_micros, account.id, reference
        );
        Ok(DepositOutcome::Credited {
            deposit,
            transfer,
            new_balance_micros,
        })
    }

    async fn existing_deposit(
        &self,
        account: &Account,
        existing: DepositRecord,
    ) -> Result<DepositOutcome, BridgeError> {
        if existing.account_id != account.id {
            warn!(
                "[{}] Account {} tried to claim {} owned by account {}",
                self.bridge.slug, account.id, existing.tx_reference, existing.account_id
            );
            return Err(BridgeError::AlreadyClaimed);
        }
        let current = database::find_account(&self.pool, account.id)
            .await?
            .ok_or(BridgeError::AccountNotFound)?;
        Ok(DepositOutcome::Idempotent {
            deposit: existing,
            balance_micros: current.balance_micros,
        })
    }

    /// Debits `amount` plus the fee and queues the payout.
    pub async fn withdraw(
        &self,
        account: &Account,
        to_address: &str,
        amount: f64,
    ) -> Result<WithdrawalOutcome, BridgeError> {
        let bridge = &self.bridge;
        let to_address = bridge
            .chain
            .normalize_address(to_address)
            .ok_or_else(|| bridge.invalid_destination())?;

        let amount_micros = decimal_to_micros(amount).map_err(|e| match e {
            AmountError::Negative => BridgeError::NonPositiveAmount,
            other => BridgeError::InvalidAmount(other),
        })?;
        if amount_micros <= 0 {
            return Err(BridgeError::NonPositiveAmount);
        }
        if amount_micros < bridge.min_withdraw_micros {
            return Err(BridgeError::BelowMinimumWithdrawal {
                minimum: micros_to_decimal(bridge.min_withdraw_micros),
            });
        }
        if amount_micros > bridge.max_withdraw_micros {
            return Err(BridgeError::AboveMaximumWithdrawal {
                maximum: micros_to_decimal(bridge.max_withdraw_micros),
            });
        }
        // The sweep pays in token units; refuse what it could never send.
        micros_to_raw(amount_micros, bridge.token_decimals)?;

        let now = now_ms();
        if let Some(remaining_secs) = self.cooldown_remaining(&self.pool, account.id, now).await? {
            return Err(BridgeError::CooldownActive { remaining_secs });
        }

        let total_debit = amount_micros
            .checked_add(bridge.withdraw_fee_micros)
            .ok_or(BridgeError::InvalidAmount(AmountError::Overflow))?;
        let current = database::find_account(&self.pool, account.id)
            .await?
            .ok_or(BridgeError::AccountNotFound)?;
        if current.balance_micros < total_debit {
            return Err(insufficient(current.balance_micros, total_debit));
        }

        let withdrawal_id = generate_withdrawal_id(&bridge.withdrawal_id_prefix, now / 1000);
        let mut tx = self.pool.begin().await?;
        let Some(new_balance_micros) =
            database::debit_account(&mut *tx, account.id, total_debit).await?
        else {
            // A concurrent debit got there first.
            tx.rollback().await?;
            let balance = database::find_account(&self.pool, account.id)
                .await?
                .map(|a| a.balance_micros)
                .unwrap_or_default();
            return Err(insufficient(balance, total_debit));
        };
        // Checked again under the write lock the debit took, so concurrent
        // requests of one account see each other's withdrawals.
        if let Some(remaining_secs) = self.cooldown_remaining(&mut *tx, account.id, now).await? {
            tx.rollback().await?;
            return Err(BridgeError::CooldownActive { remaining_secs });
        }
        let withdrawal = database::insert_withdrawal(
            &mut *tx,
            &NewWithdrawal {
                withdrawal_id: &withdrawal_id,
                bridge: &bridge.slug,
                account_id: account.id,
                to_address: &to_address,
                amount_micros,
                fee_micros: bridge.withdraw_fee_micros,
            },
        )
        .await?;
        database::append_ledger_entry(
            &mut *tx,
            account.id,
            &bridge.slug,
            LedgerKind::Withdrawal,
            &withdrawal_id,
            -total_debit,
            new_balance_micros,
        )
        .await?;
        tx.commit().await?;

        info!(
            "[{}] Queued withdrawal {} of {} micro-RTC (fee {}) for account {}",
            bridge.slug, withdrawal_id, amount_micros, bridge.withdraw_fee_micros, account.id
        );
        Ok(WithdrawalOutcome {
            withdrawal,
            new_balance_micros,
        })
    }

    /// Seconds until `account` may withdraw again, if a cooldown is running.
    async fn cooldown_remaining<'e, E: SqliteExecutor<'e>>(
        &self,
        executor: E,
        account_id: i64,
        now: i64,
    ) -> Result<Option<u64>, sqlx::Error> {
        if self.bridge.withdraw_cooldown_secs == 0 {
            return Ok(None);
        }
        let Some(last) = database::last_withdrawal_at(executor, &self.bridge.slug, account_id).await?
        else {
            return Ok(None);
        };
        let cooldown_ms = i64::try_from(self.bridge.withdraw_cooldown_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let elapsed = now.saturating_sub(last);
        if elapsed >= cooldown_ms {
            return Ok(None);
        }
        Ok(Some(((cooldown_ms - elapsed) as u64).div_ceil(1000)))
    }

    /// Newest-first deposits and withdrawals of `account` on this bridge.
    pub async fn history(
        &self,
        account: &Account,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<HistoryRow>, BridgeError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        let rows =
            database::account_history(&self.pool, &self.bridge.slug, account.id, limit, offset)
                .await?;
        Ok(rows)
    }

    pub async fn stats(&self) -> Result<BridgeStats, BridgeError> {
        let slug = &self.bridge.slug;
        let deposits = database::deposit_totals(&self.pool, slug).await?;
        let rows = database::withdrawal_totals_by_status(&self.pool, slug).await?;

        let mut withdrawals: Vec<StatusTotals> = WithdrawalStatus::ALL
            .iter()
            .map(|status| StatusTotals {
                status: *status,
                count: 0,
                sum_micros: 0,
                fee_micros: 0,
            })
            .collect();
        for row in rows {
            if let Some(entry) = withdrawals
                .iter_mut()
                .find(|w| w.status == row.status.canonical())
            {
                entry.count += row.count;
                entry.sum_micros += row.sum_micros;
                entry.fee_micros += row.fee_micros;
            }
        }

        Ok(BridgeStats {
            deposits,
            withdrawals,
        })
    }
}

fn insufficient(balance_micros: i64, required_micros: i64) -> BridgeError {
    BridgeError::InsufficientBalance {
        balance: micros_to_decimal(balance_micros),
        required: micros_to_decimal(required_micros),
    }
}
