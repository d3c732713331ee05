#[path = "utils.rs"]
mod utils;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtc_bridge::chain::MockTransferVerifier;
use rtc_bridge::config::SettlementConfig;
use rtc_bridge::db::database::{find_account, find_withdrawal, try_acquire_lease};
use rtc_bridge::db::models::WithdrawalStatus;
use rtc_bridge::queue::settlement::SettlementSweep;
use rtc_bridge::relayer::payout::{MockPayoutExecutor, PayoutError, PayoutStatus};
use utils::*;

const PAYOUT_TX: &str = "0xcccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

fn process_uri() -> String {
    format!("{}/process-withdrawals", BASE_PATH)
}

/// App with `executor` wired in and one queued 8 RTC withdrawal from a
/// 10 RTC deposit. Returns the app, the account id and the withdrawal id.
async fn app_with_queued_withdrawal(executor: Option<MockPayoutExecutor>) -> (TestApp, i64, String) {
    let app = create_test_app_with(
        create_test_bridge_config(),
        verifier_paying(10),
        executor,
        Some(ADMIN_KEY),
    )
    .await;
    let (account, key) = create_test_account(&app.db, "alice", Some(SENDER)).await;

    let (status, _) = send(
        &app.router,
        post_json(
            &format!("{}/deposit", BASE_PATH),
            Some(&key),
            json!({ "tx_hash": TX_A }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app.router,
        post_json(
            &format!("{}/withdraw", BASE_PATH),
            Some(&key),
            json!({ "to_address": DESTINATION, "amount": 8.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let withdrawal_id = body["withdrawal"]["withdrawal_id"]
        .as_str()
        .unwrap()
        .to_string();

    (app, account.id, withdrawal_id)
}

async fn withdrawal_status(app: &TestApp, withdrawal_id: &str) -> WithdrawalStatus {
    find_withdrawal(&app.db.pool, withdrawal_id)
        .await
        .unwrap()
        .unwrap()
        .status
}

fn funded_executor() -> MockPayoutExecutor {
    let mut executor = MockPayoutExecutor::new();
    executor
        .expect_available_balance()
        .returning(|| Ok(1_000_000_000_000));
    executor
}

#[tokio::test]
async fn test_process_withdrawals_requires_admin_key() {
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(MockPayoutExecutor::new())).await;

    let (status, body) = send(&app.router, admin_post(&process_uri(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Admin authentication required");

    let (status, _) = send(&app.router, admin_post(&process_uri(), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Queued);
}

#[tokio::test]
async fn test_admin_endpoint_fails_closed_without_configured_key() {
    let app = create_test_app_with(
        create_test_bridge_config(),
        MockTransferVerifier::new(),
        Some(MockPayoutExecutor::new()),
        None,
    )
    .await;

    let (status, _) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bridge_without_executor_is_unavailable() {
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(None).await;

    let (status, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Settlement is not configured for this bridge");
    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Queued);
}

#[tokio::test]
async fn test_confirmed_payout_marks_withdrawal_sent() {
    let mut executor = funded_executor();
    executor
        .expect_submit()
        .withf(|to, amount| to == DESTINATION && *amount == 8_000_000)
        .times(1)
        .returning(|_, _| Ok(PAYOUT_TX.to_string()));
    executor
        .expect_status()
        .withf(|tx| tx == PAYOUT_TX)
        .returning(|_| Ok(PayoutStatus::Confirmed));
    let (app, account_id, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    let (status, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    assert_eq!(
        body["results"][0],
        json!({
            "withdrawal_id": withdrawal_id,
            "status": "sent",
            "tx_reference": PAYOUT_TX,
        })
    );

    let row = find_withdrawal(&app.db.pool, &withdrawal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WithdrawalStatus::Sent);
    assert_eq!(row.tx_reference.as_deref(), Some(PAYOUT_TX));

    // Sent rows are not picked up again.
    let (_, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(body["processed"], 0);

    let balance = find_account(&app.db.pool, account_id)
        .await
        .unwrap()
        .unwrap()
        .balance_micros;
    assert_eq!(balance, 1_500_000);
}

#[tokio::test]
async fn test_rejected_payout_fails_without_refund() {
    let mut executor = funded_executor();
    executor
        .expect_submit()
        .times(1)
        .returning(|_, _| Err(PayoutError::Rejected("execution reverted".to_string())));
    executor.expect_status().never();
    let (app, account_id, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    let (status, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["status"], "failed");
    assert!(body["results"][0]["reason"]
        .as_str()
        .unwrap()
        .contains("execution reverted"));

    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Failed);
    let balance = find_account(&app.db.pool, account_id)
        .await
        .unwrap()
        .unwrap()
        .balance_micros;
    assert_eq!(balance, 1_500_000);

    // Failed is terminal.
    let (_, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn test_transient_error_is_retried_on_next_run() {
    let submits = Arc::new(AtomicUsize::new(0));
    let counter = submits.clone();

    let mut executor = funded_executor();
    executor.expect_submit().times(2).returning(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(PayoutError::Transient("connection reset".to_string()))
        } else {
            Ok(PAYOUT_TX.to_string())
        }
    });
    executor
        .expect_status()
        .returning(|_| Ok(PayoutStatus::Confirmed));
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    let (_, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(body["results"][0]["status"], "processing");
    assert_eq!(
        withdrawal_status(&app, &withdrawal_id).await,
        WithdrawalStatus::Processing
    );

    let (_, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(body["results"][0]["status"], "sent");
    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Sent);
    assert_eq!(submits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_submitted_payout_is_reconciled_not_resubmitted() {
    let checks = Arc::new(AtomicUsize::new(0));
    let counter = checks.clone();

    let mut executor = funded_executor();
    executor
        .expect_submit()
        .times(1)
        .returning(|_, _| Ok(PAYOUT_TX.to_string()));
    executor.expect_status().returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(PayoutStatus::Pending)
        } else {
            Ok(PayoutStatus::Confirmed)
        }
    });
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    let (_, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(body["results"][0]["status"], "processing");
    assert_eq!(body["results"][0]["tx_reference"], PAYOUT_TX);

    let (_, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(body["results"][0]["status"], "sent");
    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Sent);
}

#[tokio::test]
async fn test_reverted_payout_fails() {
    let mut executor = funded_executor();
    executor
        .expect_submit()
        .times(1)
        .returning(|_, _| Ok(PAYOUT_TX.to_string()));
    executor
        .expect_status()
        .returning(|_| Ok(PayoutStatus::Reverted));
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    let (_, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(body["results"][0]["status"], "failed");
    assert_eq!(body["results"][0]["tx_reference"], PAYOUT_TX);
    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Failed);
}

#[tokio::test]
async fn test_insufficient_hot_wallet_halts_before_claiming() {
    let mut executor = MockPayoutExecutor::new();
    executor
        .expect_available_balance()
        .returning(|| Ok(1_000_000));
    executor.expect_submit().never();
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    let (status, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 0);
    assert!(body["halted"].as_str().unwrap().contains("hot wallet balance"));

    let row = find_withdrawal(&app.db.pool, &withdrawal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WithdrawalStatus::Queued);
    assert_eq!(row.attempts, 0);
}

#[tokio::test]
async fn test_unreadable_hot_wallet_leaves_queue_untouched() {
    let mut executor = MockPayoutExecutor::new();
    executor
        .expect_available_balance()
        .returning(|| Err(PayoutError::Transient("timeout".to_string())));
    executor.expect_submit().never();
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    let (status, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 0);
    assert!(body["halted"].is_string());
    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Queued);
}

#[tokio::test]
async fn test_live_lease_excludes_second_sweeper() {
    let mut executor = MockPayoutExecutor::new();
    executor.expect_available_balance().never();
    executor.expect_submit().never();
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    assert!(try_acquire_lease(&app.db.pool, "base", "sweep-elsewhere", 60_000)
        .await
        .unwrap());

    let (status, body) = send(&app.router, admin_post(&process_uri(), Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["lease_held"], true);
    assert_eq!(withdrawal_status(&app, &withdrawal_id).await, WithdrawalStatus::Queued);

    let sweep = app.state.settlement.clone().unwrap();
    let report = sweep.process_once().await.unwrap();
    assert!(!report.lease_acquired);
    assert!(report.results.is_empty());
}

/// Sweep over `app`'s bridge sharing `executor`, as a second process would.
fn sweep_for(app: &TestApp, executor: Arc<MockPayoutExecutor>, config: SettlementConfig) -> SettlementSweep {
    SettlementSweep::new(
        app.db.pool.clone(),
        Arc::new(app.state.service.bridge().clone()),
        executor,
        config,
    )
}

#[tokio::test]
async fn test_overlapping_runs_of_one_sweep_pay_once() {
    let mut executor = funded_executor();
    executor
        .expect_submit()
        .times(1)
        .returning(|_, _| Ok(PAYOUT_TX.to_string()));
    executor
        .expect_status()
        .returning(|_| Ok(PayoutStatus::Confirmed));
    let (app, _, withdrawal_id) = app_with_queued_withdrawal(Some(executor)).await;

    // The periodic loop and the admin endpoint share this instance.
    let sweep = app.state.settlement.clone().unwrap();
    let (first, second) = tokio::join!(sweep.process_once(), sweep.process_once());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.lease_acquired != second.lease_acquired);
    let worked = if first.lease_acquired { first } else { second };
    assert_eq!(worked.results.len(), 1);
    assert_eq!(worked.results[0].tx_reference.as_deref(), Some(PAYOUT_TX));

    let row = find_withdrawal(&app.db.pool, &withdrawal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WithdrawalStatus::Sent);
    assert_eq!(row.attempts, 1);

    // The lease was released; the next run finds nothing left to pay.
    let report = sweep.process_once().await.unwrap();
    assert!(report.lease_acquired);
    assert!(report.results.is_empty());
}

#[tokio::test]
async fn test_lease_takeover_never_resubmits() {
    let app = create_test_app_with(
        create_test_bridge_config(),
        verifier_paying(20),
        None,
        Some(ADMIN_KEY),
    )
    .await;
    let (_, key) = create_test_account(&app.db, "alice", Some(SENDER)).await;
    let (status, _) = send(
        &app.router,
        post_json(
            &format!("{}/deposit", BASE_PATH),
            Some(&key),
            json!({ "tx_hash": TX_A }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut withdrawal_ids = Vec::new();
    for _ in 0..2 {
        let (status, body) = send(
            &app.router,
            post_json(
                &format!("{}/withdraw", BASE_PATH),
                Some(&key),
                json!({ "to_address": DESTINATION, "amount": 8.0 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        withdrawal_ids.push(body["withdrawal"]["withdrawal_id"].as_str().unwrap().to_string());
    }

    let submits = Arc::new(AtomicUsize::new(0));
    let counter = submits.clone();
    let mut executor = funded_executor();
    executor.expect_submit().returning(move |_, _| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0x{:064x}", n))
    });
    executor
        .expect_status()
        .returning(|_| Ok(PayoutStatus::Pending));
    let executor = Arc::new(executor);

    // `slow` outlives its 1s lease waiting for the first receipt.
    let slow = sweep_for(
        &app,
        executor.clone(),
        SettlementConfig {
            lease_ttl_secs: 1,
            receipt_timeout_secs: 2,
            receipt_poll_ms: 100,
            ..create_test_settlement_config()
        },
    );
    let other = sweep_for(&app, executor, create_test_settlement_config());

    let (slow_report, other_report) = tokio::join!(slow.process_once(), async {
        tokio::time::sleep(Duration::from_millis(1_300)).await;
        other.process_once().await
    });
    let (slow_report, other_report) = (slow_report.unwrap(), other_report.unwrap());

    assert!(other_report.lease_acquired);
    assert_eq!(other_report.results.len(), 2);
    assert_eq!(slow_report.halted.as_deref(), Some("settlement lease lost"));
    assert_eq!(slow_report.results.len(), 1);

    // One submission per withdrawal, each reference kept.
    assert_eq!(submits.load(Ordering::SeqCst), 2);
    let mut references = Vec::new();
    for withdrawal_id in &withdrawal_ids {
        let row = find_withdrawal(&app.db.pool, withdrawal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, WithdrawalStatus::Processing);
        references.push(row.tx_reference.unwrap());
    }
    references.sort();
    references.dedup();
    assert_eq!(references.len(), 2);
}
