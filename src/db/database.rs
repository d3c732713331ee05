use sqlx::SqliteExecutor;

use super::models::{
    Account, BoundWallet, DepositRecord, HistoryRow, LedgerEntry, LedgerKind, NewDeposit,
    NewWithdrawal, StatusTotals, Totals, WithdrawalRecord,
};
use crate::utils::time::now_ms;

const WITHDRAWAL_COLUMNS: &str = "id, withdrawal_id, bridge, account_id, to_address, \
    amount_micros, fee_micros, status, tx_reference, note, attempts, created_at_ms, updated_at_ms";

/// True when `err` is the store rejecting a duplicate key.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// Accounts and wallets

pub async fn insert_account<'e, E: SqliteExecutor<'e>>(
    executor: E,
    name: &str,
    api_key_hash: &str,
) -> Result<Account, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (name, api_key_hash, balance_micros, created_at_ms)
        VALUES (?, ?, 0, ?)
        RETURNING id, name, api_key_hash, balance_micros, created_at_ms
        "#,
    )
    .bind(name)
    .bind(api_key_hash)
    .bind(now_ms())
    .fetch_one(executor)
    .await
}

pub async fn find_account<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "SELECT id, name, api_key_hash, balance_micros, created_at_ms FROM accounts WHERE id = ?",
    )
    .bind(account_id)
    .fetch_optional(executor)
    .await
}

pub async fn find_account_by_name<'e, E: SqliteExecutor<'e>>(
    executor: E,
    name: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "SELECT id, name, api_key_hash, balance_micros, created_at_ms FROM accounts WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(executor)
    .await
}

pub async fn find_account_by_key_hash<'e, E: SqliteExecutor<'e>>(
    executor: E,
    api_key_hash: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"SELECT id, name, api_key_hash, balance_micros, created_at_ms
           FROM accounts WHERE api_key_hash = ?"#,
    )
    .bind(api_key_hash)
    .fetch_optional(executor)
    .await
}

/// Registers (or replaces) the account's address for a chain kind.
pub async fn bind_wallet<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
    chain: &str,
    address: &str,
) -> Result<BoundWallet, sqlx::Error> {
    sqlx::query_as::<_, BoundWallet>(
        r#"
        INSERT INTO account_wallets (account_id, chain, address, bound_at_ms)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (account_id, chain)
        DO UPDATE SET address = excluded.address, bound_at_ms = excluded.bound_at_ms
        RETURNING account_id, chain, address, bound_at_ms
        "#,
    )
    .bind(account_id)
    .bind(chain)
    .bind(address)
    .bind(now_ms())
    .fetch_one(executor)
    .await
}

pub async fn bound_wallet<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
    chain: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT address FROM account_wallets WHERE account_id = ? AND chain = ?",
    )
    .bind(account_id)
    .bind(chain)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(address,)| address))
}

pub async fn list_wallets<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
) -> Result<Vec<BoundWallet>, sqlx::Error> {
    sqlx::query_as::<_, BoundWallet>(
        r#"SELECT account_id, chain, address, bound_at_ms
           FROM account_wallets WHERE account_id = ? ORDER BY chain"#,
    )
    .bind(account_id)
    .fetch_all(executor)
    .await
}

// Balance and ledger

/// Adds `amount_micros` to the balance and returns the new balance, or
/// `None` when the account does not exist.
pub async fn credit_account<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
    amount_micros: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query_as::<_, (i64,)>(
        r#"
        UPDATE accounts SET balance_micros = balance_micros + ?
        WHERE id = ?
        RETURNING balance_micros
        "#,
    )
    .bind(amount_micros)
    .bind(account_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(balance,)| balance))
}

/// Subtracts `amount_micros` only when the balance covers it. `None` means
/// the debit did not happen.
pub async fn debit_account<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
    amount_micros: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query_as::<_, (i64,)>(
        r#"
        UPDATE accounts SET balance_micros = balance_micros - ?1
        WHERE id = ?2 AND balance_micros >= ?1
        RETURNING balance_micros
        "#,
    )
    .bind(amount_micros)
    .bind(account_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(balance,)| balance))
}

pub async fn append_ledger_entry<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
    bridge: &str,
    kind: LedgerKind,
    reference: &str,
    delta_micros: i64,
    balance_after_micros: i64,
) -> Result<LedgerEntry, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO ledger_entries
            (account_id, bridge, kind, reference, delta_micros, balance_after_micros, created_at_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id, account_id, bridge, kind, reference, delta_micros,
                  balance_after_micros, created_at_ms
        "#,
    )
    .bind(account_id)
    .bind(bridge)
    .bind(kind.as_str())
    .bind(reference)
    .bind(delta_micros)
    .bind(balance_after_micros)
    .bind(now_ms())
    .fetch_one(executor)
    .await
}

pub async fn recent_ledger_entries<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
    limit: i64,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, account_id, bridge, kind, reference, delta_micros,
               balance_after_micros, created_at_ms
        FROM ledger_entries
        WHERE account_id = ?
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(executor)
    .await
}

/// Sum of all ledger deltas for an account. Matches the balance column
/// unless balances were edited outside the ledger.
pub async fn ledger_balance<'e, E: SqliteExecutor<'e>>(
    executor: E,
    account_id: i64,
) -> Result<i64, sqlx::Error> {
    let (sum,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COALESCE(SUM(delta_micros), 0) FROM ledger_entries WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_one(executor)
    .await?;

    Ok(sum)
}

// Deposits

pub async fn find_deposit<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
    tx_reference: &str,
) -> Result<Option<DepositRecord>, sqlx::Error> {
    sqlx::query_as::<_, DepositRecord>(
        r#"
        SELECT id, bridge, tx_reference, account_id, sender_address, reserve_address,
               token_id, amount_raw, amount_micros, ordering_marker, block_time, created_at_ms
        FROM bridge_deposits
        WHERE bridge = ? AND tx_reference = ?
        "#,
    )
    .bind(bridge)
    .bind(tx_reference)
    .fetch_optional(executor)
    .await
}

pub async fn insert_deposit<'e, E: SqliteExecutor<'e>>(
    executor: E,
    deposit: &NewDeposit<'_>,
) -> Result<DepositRecord, sqlx::Error> {
    let ordering_marker = deposit.ordering_marker.and_then(|m| i64::try_from(m).ok());

    sqlx::query_as::<_, DepositRecord>(
        r#"
        INSERT INTO bridge_deposits
            (bridge, tx_reference, account_id, sender_address, reserve_address, token_id,
             amount_raw, amount_micros, ordering_marker, block_time, created_at_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, bridge, tx_reference, account_id, sender_address, reserve_address,
                  token_id, amount_raw, amount_micros, ordering_marker, block_time, created_at_ms
        "#,
    )
    .bind(deposit.bridge)
    .bind(deposit.tx_reference)
    .bind(deposit.account_id)
    .bind(deposit.sender_address)
    .bind(deposit.reserve_address)
    .bind(deposit.token_id)
    .bind(deposit.amount_raw.to_string())
    .bind(deposit.amount_micros)
    .bind(ordering_marker)
    .bind(deposit.block_time)
    .bind(now_ms())
    .fetch_one(executor)
    .await
}

pub async fn deposit_totals<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
) -> Result<Totals, sqlx::Error> {
    sqlx::query_as::<_, Totals>(
        r#"
        SELECT COUNT(*) AS count, COALESCE(SUM(amount_micros), 0) AS sum_micros
        FROM bridge_deposits WHERE bridge = ?
        "#,
    )
    .bind(bridge)
    .fetch_one(executor)
    .await
}

// Withdrawals

pub async fn insert_withdrawal<'e, E: SqliteExecutor<'e>>(
    executor: E,
    withdrawal: &NewWithdrawal<'_>,
) -> Result<WithdrawalRecord, sqlx::Error> {
    let now = now_ms();
    let sql = format!(
        r#"
        INSERT INTO bridge_withdrawals
            (withdrawal_id, bridge, account_id, to_address, amount_micros, fee_micros,
             status, note, attempts, created_at_ms, updated_at_ms)
        VALUES (?, ?, ?, ?, ?, ?, 'queued', '', 0, ?, ?)
        RETURNING {WITHDRAWAL_COLUMNS}
        "#
    );
    sqlx::query_as::<_, WithdrawalRecord>(&sql)
        .bind(withdrawal.withdrawal_id)
        .bind(withdrawal.bridge)
        .bind(withdrawal.account_id)
        .bind(withdrawal.to_address)
        .bind(withdrawal.amount_micros)
        .bind(withdrawal.fee_micros)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
}

pub async fn find_withdrawal<'e, E: SqliteExecutor<'e>>(
    executor: E,
    withdrawal_id: &str,
) -> Result<Option<WithdrawalRecord>, sqlx::Error> {
    let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM bridge_withdrawals WHERE withdrawal_id = ?");
    sqlx::query_as::<_, WithdrawalRecord>(&sql)
        .bind(withdrawal_id)
        .fetch_optional(executor)
        .await
}

/// Creation time of the account's latest withdrawal on this bridge.
pub async fn last_withdrawal_at<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
    account_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let (last,) = sqlx::query_as::<_, (Option<i64>,)>(
        "SELECT MAX(created_at_ms) FROM bridge_withdrawals WHERE bridge = ? AND account_id = ?",
    )
    .bind(bridge)
    .bind(account_id)
    .fetch_one(executor)
    .await?;

    Ok(last)
}

/// Rows the settlement sweep still owns, oldest first.
pub async fn settleable_withdrawals<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
    limit: i64,
) -> Result<Vec<WithdrawalRecord>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {WITHDRAWAL_COLUMNS} FROM bridge_withdrawals
        WHERE bridge = ? AND status IN ('queued', 'processing')
        ORDER BY id ASC
        LIMIT ?
        "#
    );
    sqlx::query_as::<_, WithdrawalRecord>(&sql)
        .bind(bridge)
        .bind(limit)
        .fetch_all(executor)
        .await
}

/// Moves a row to `processing` and counts the attempt. A row already in
/// `processing` is only taken back when it was last touched at or before
/// `touched_before_ms`, i.e. by an earlier run. `None` means the row is
/// terminal or another run is working on it.
pub async fn claim_withdrawal<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    touched_before_ms: i64,
) -> Result<Option<WithdrawalRecord>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE bridge_withdrawals
        SET status = 'processing', attempts = attempts + 1, updated_at_ms = ?
        WHERE id = ?
          AND (status = 'queued' OR (status = 'processing' AND updated_at_ms <= ?))
        RETURNING {WITHDRAWAL_COLUMNS}
        "#
    );
    sqlx::query_as::<_, WithdrawalRecord>(&sql)
        .bind(now_ms())
        .bind(id)
        .bind(touched_before_ms)
        .fetch_optional(executor)
        .await
}

/// Stores the payout transaction reference before its outcome is known.
pub async fn record_submission<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    tx_reference: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE bridge_withdrawals SET tx_reference = ?, updated_at_ms = ?
        WHERE id = ? AND status = 'processing' AND tx_reference IS NULL
        "#,
    )
    .bind(tx_reference)
    .bind(now_ms())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_sent<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    tx_reference: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE bridge_withdrawals
        SET status = 'sent', tx_reference = ?, note = '', updated_at_ms = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(tx_reference)
    .bind(now_ms())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_failed<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    note: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE bridge_withdrawals SET status = 'failed', note = ?, updated_at_ms = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(note)
    .bind(now_ms())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Keeps the row in `processing` and records why it is not finished yet.
pub async fn note_retry<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    note: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE bridge_withdrawals SET note = ?, updated_at_ms = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(note)
    .bind(now_ms())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn withdrawal_totals_by_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
) -> Result<Vec<StatusTotals>, sqlx::Error> {
    sqlx::query_as::<_, StatusTotals>(
        r#"
        SELECT status,
               COUNT(*) AS count,
               COALESCE(SUM(amount_micros), 0) AS sum_micros,
               COALESCE(SUM(fee_micros), 0) AS fee_micros
        FROM bridge_withdrawals
        WHERE bridge = ?
        GROUP BY status
        "#,
    )
    .bind(bridge)
    .fetch_all(executor)
    .await
}

// History

/// Deposits and withdrawals of one account on one bridge, newest first.
pub async fn account_history<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
    account_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<HistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT kind, id, reference, counterparty, amount_micros, fee_micros,
               status, tx_reference, note, created_at_ms
        FROM (
            SELECT 'deposit' AS kind, id, tx_reference AS reference,
                   sender_address AS counterparty, amount_micros, 0 AS fee_micros,
                   'verified' AS status, tx_reference, '' AS note, created_at_ms
            FROM bridge_deposits
            WHERE bridge = ?1 AND account_id = ?2
            UNION ALL
            SELECT 'withdrawal' AS kind, id, withdrawal_id AS reference,
                   to_address AS counterparty, amount_micros, fee_micros,
                   CASE status WHEN 'completed' THEN 'sent' ELSE status END AS status,
                   tx_reference, note, created_at_ms
            FROM bridge_withdrawals
            WHERE bridge = ?1 AND account_id = ?2
        )
        ORDER BY created_at_ms DESC, id DESC, kind ASC
        LIMIT ?3 OFFSET ?4
        "#,
    )
    .bind(bridge)
    .bind(account_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
}

// Settlement leases

/// Takes the bridge's lease when it is free or expired.
pub async fn try_acquire_lease<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
    holder: &str,
    ttl_ms: i64,
) -> Result<bool, sqlx::Error> {
    let now = now_ms();
    let result = sqlx::query(
        r#"
        INSERT INTO settlement_leases (bridge, holder, expires_at_ms)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (bridge) DO UPDATE
            SET holder = excluded.holder, expires_at_ms = excluded.expires_at_ms
            WHERE settlement_leases.expires_at_ms <= ?4
        "#,
    )
    .bind(bridge)
    .bind(holder)
    .bind(now + ttl_ms)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Pushes the expiry of a lease `holder` still owns. `false` means the
/// lease was released or taken over.
pub async fn renew_lease<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
    holder: &str,
    ttl_ms: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE settlement_leases SET expires_at_ms = ? WHERE bridge = ? AND holder = ?",
    )
    .bind(now_ms() + ttl_ms)
    .bind(bridge)
    .bind(holder)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn release_lease<'e, E: SqliteExecutor<'e>>(
    executor: E,
    bridge: &str,
    holder: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM settlement_leases WHERE bridge = ? AND holder = ?")
        .bind(bridge)
        .bind(holder)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::client::DBClient;
    use crate::db::models::WithdrawalStatus;

    async fn setup() -> DBClient {
        let db = DBClient::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_debit_is_conditional() {
        let db = setup().await;
        let account = insert_account(&db.pool, "alice", "hash").await.unwrap();

        assert_eq!(credit_account(&db.pool, account.id, 1_000).await.unwrap(), Some(1_000));
        assert_eq!(debit_account(&db.pool, account.id, 1_001).await.unwrap(), None);
        assert_eq!(debit_account(&db.pool, account.id, 400).await.unwrap(), Some(600));
        assert_eq!(credit_account(&db.pool, 9_999, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_deposit_is_unique_violation() {
        let db = setup().await;
        let account = insert_account(&db.pool, "alice", "hash").await.unwrap();
        let deposit = NewDeposit {
            bridge: "base",
            tx_reference: "0xabc",
            account_id: account.id,
            sender_address: "0xsender",
            reserve_address: "0xreserve",
            token_id: "0xtoken",
            amount_raw: 2_500_000,
            amount_micros: 2_500_000,
            ordering_marker: Some(100),
            block_time: None,
        };

        let stored = insert_deposit(&db.pool, &deposit).await.unwrap();
        assert_eq!(stored.amount_raw, "2500000");
        assert_eq!(stored.ordering_marker, Some(100));

        let err = insert_deposit(&db.pool, &deposit).await.unwrap_err();
        assert!(is_unique_violation(&err));

        // Same reference on another bridge is a different deposit.
        let other = NewDeposit {
            bridge: "wrtc",
            ..deposit.clone()
        };
        assert!(insert_deposit(&db.pool, &other).await.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_key_is_unique() {
        let db = setup().await;
        let account = insert_account(&db.pool, "alice", "hash").await.unwrap();
        append_ledger_entry(&db.pool, account.id, "base", LedgerKind::Deposit, "0xabc", 5, 5)
            .await
            .unwrap();
        let err = append_ledger_entry(&db.pool, account.id, "base", LedgerKind::Deposit, "0xabc", 5, 10)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
        assert_eq!(ledger_balance(&db.pool, account.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_claim_stops_at_terminal_status() {
        let db = setup().await;
        let account = insert_account(&db.pool, "alice", "hash").await.unwrap();
        let row = insert_withdrawal(
            &db.pool,
            &NewWithdrawal {
                withdrawal_id: "wd_1_00000000",
                bridge: "base",
                account_id: account.id,
                to_address: "0xdest",
                amount_micros: 8_000_000,
                fee_micros: 500_000,
            },
        )
        .await
        .unwrap();
        assert_eq!(row.status, WithdrawalStatus::Queued);

        let claimed = claim_withdrawal(&db.pool, row.id, 0).await.unwrap().unwrap();
        assert_eq!(claimed.status, WithdrawalStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        // Another run started before this claim cannot take the row.
        let earlier_run = claimed.updated_at_ms - 1;
        assert!(claim_withdrawal(&db.pool, row.id, earlier_run).await.unwrap().is_none());
        // A later run can.
        let reclaimed = claim_withdrawal(&db.pool, row.id, i64::MAX).await.unwrap().unwrap();
        assert_eq!(reclaimed.attempts, 2);

        assert!(record_submission(&db.pool, row.id, "0xtx").await.unwrap());
        assert!(!record_submission(&db.pool, row.id, "0xother").await.unwrap());
        assert!(mark_sent(&db.pool, row.id, "0xtx").await.unwrap());

        assert!(claim_withdrawal(&db.pool, row.id, i64::MAX).await.unwrap().is_none());
        assert!(!mark_failed(&db.pool, row.id, "late").await.unwrap());
        assert!(settleable_withdrawals(&db.pool, "base", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_completed_status_reads_as_sent() {
        let db = setup().await;
        let account = insert_account(&db.pool, "alice", "hash").await.unwrap();
        sqlx::query(
            r#"INSERT INTO bridge_withdrawals
               (withdrawal_id, bridge, account_id, to_address, amount_micros, fee_micros,
                status, created_at_ms, updated_at_ms)
               VALUES ('wd_old', 'base', ?, '0xdest', 1, 0, 'completed', 1, 1)"#,
        )
        .bind(account.id)
        .execute(&db.pool)
        .await
        .unwrap();

        let row = find_withdrawal(&db.pool, "wd_old").await.unwrap().unwrap();
        assert_eq!(row.status.canonical(), WithdrawalStatus::Sent);

        let history = account_history(&db.pool, "base", account.id, 10, 0).await.unwrap();
        assert_eq!(history[0].status, "sent");
    }

    #[tokio::test]
    async fn test_lease_excludes_other_holders() {
        let db = setup().await;
        assert!(try_acquire_lease(&db.pool, "base", "one", 60_000).await.unwrap());
        assert!(!try_acquire_lease(&db.pool, "base", "two", 60_000).await.unwrap());
        // A live lease is not re-entrant, even for its holder.
        assert!(!try_acquire_lease(&db.pool, "base", "one", 60_000).await.unwrap());
        assert!(renew_lease(&db.pool, "base", "one", 60_000).await.unwrap());
        assert!(!renew_lease(&db.pool, "base", "two", 60_000).await.unwrap());
        assert!(try_acquire_lease(&db.pool, "wrtc", "two", 60_000).await.unwrap());

        assert!(!release_lease(&db.pool, "base", "two").await.unwrap());
        assert!(release_lease(&db.pool, "base", "one").await.unwrap());
        assert!(try_acquire_lease(&db.pool, "base", "two", 60_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let db = setup().await;
        assert!(try_acquire_lease(&db.pool, "base", "one", -1).await.unwrap());
        assert!(try_acquire_lease(&db.pool, "base", "two", 60_000).await.unwrap());
        // The previous holder can no longer extend it.
        assert!(!renew_lease(&db.pool, "base", "one", 60_000).await.unwrap());
    }
}
