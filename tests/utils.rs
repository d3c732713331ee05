#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use rtc_bridge::api::auth::{ADMIN_KEY_HEADER, API_KEY_HEADER};
use rtc_bridge::api::routes::{create_router, AppState};
use rtc_bridge::bridge::accounts::{bind_wallet, create_account};
use rtc_bridge::bridge::service::{Bridge, BridgeService};
use rtc_bridge::chain::{ChainKind, MockTransferVerifier, TransferDescriptor};
use rtc_bridge::config::{BridgeConfig, SettlementConfig};
use rtc_bridge::db::client::DBClient;
use rtc_bridge::db::models::Account;
use rtc_bridge::queue::settlement::SettlementSweep;
use rtc_bridge::relayer::payout::MockPayoutExecutor;

pub const TOKEN: &str = "0x5b0e2cf6f0b7c5a2e3e1d8f0a1b2c3d4e5f60718";
pub const RESERVE: &str = "0x1111111111111111111111111111111111111111";
pub const SENDER: &str = "0x2222222222222222222222222222222222222222";
pub const OTHER_SENDER: &str = "0x3333333333333333333333333333333333333333";
pub const DESTINATION: &str = "0x4444444444444444444444444444444444444444";
pub const ADMIN_KEY: &str = "admin-secret";
pub const BASE_PATH: &str = "/api/base-bridge";

pub const TX_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const TX_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

pub struct TestApp {
    pub db: DBClient,
    pub router: Router,
    pub state: AppState,
}

/// Base-style EVM bridge with a 1 RTC minimum, 0.5 RTC fee and no cooldown.
pub fn create_test_bridge_config() -> BridgeConfig {
    BridgeConfig {
        slug: "base".to_string(),
        chain: ChainKind::Evm,
        network: "base-sepolia".to_string(),
        rpc_url: "http://127.0.0.1:8545".to_string(),
        rpc_timeout_secs: 5,
        token_id: TOKEN.to_string(),
        token_decimals: 6,
        reserve_address: RESERVE.to_string(),
        confirmations: 12,
        min_deposit: 1.0,
        min_withdraw: 1.0,
        max_withdraw: 1_000.0,
        withdraw_fee: 0.5,
        withdraw_cooldown_secs: 0,
        withdrawal_id_prefix: "bwd".to_string(),
        buy_url: None,
        payout: None,
    }
}

pub fn create_test_settlement_config() -> SettlementConfig {
    SettlementConfig {
        enabled: false,
        interval_secs: 1,
        batch_size: 20,
        lease_ttl_secs: 60,
        receipt_timeout_secs: 0,
        receipt_poll_ms: 10,
    }
}

/// Canonical transfer of `amount_rtc` from `sender` into the reserve.
pub fn transfer(reference: &str, sender: &str, amount_rtc: u64) -> TransferDescriptor {
    TransferDescriptor {
        reference: reference.to_string(),
        token_id: TOKEN.to_string(),
        reserve_address: RESERVE.to_string(),
        sender_address: sender.to_string(),
        amount_raw: u128::from(amount_rtc) * 1_000_000,
        decimals: 6,
        ordering_marker: Some(1_000),
        block_time: None,
    }
}

pub async fn create_test_db() -> DBClient {
    let db = DBClient::in_memory()
        .await
        .expect("Failed to open in-memory database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

pub async fn create_test_app(config: BridgeConfig, verifier: MockTransferVerifier) -> TestApp {
    create_test_app_with(config, verifier, None, Some(ADMIN_KEY)).await
}

pub async fn create_test_app_with(
    config: BridgeConfig,
    verifier: MockTransferVerifier,
    executor: Option<MockPayoutExecutor>,
    admin_key: Option<&str>,
) -> TestApp {
    let db = create_test_db().await;
    let bridge = Arc::new(Bridge::from_config(&config).expect("Invalid test bridge"));
    let settlement = executor.map(|executor| {
        Arc::new(SettlementSweep::new(
            db.pool.clone(),
            bridge.clone(),
            Arc::new(executor),
            create_test_settlement_config(),
        ))
    });

    let state = AppState {
        db: db.pool.clone(),
        service: Arc::new(BridgeService::new(
            db.pool.clone(),
            bridge,
            Arc::new(verifier),
        )),
        settlement,
        admin_key: admin_key.map(str::to_string),
    };
    let router = create_router(vec![state.clone()]);

    TestApp { db, router, state }
}

/// Creates an account, optionally binding its EVM wallet, and returns its key.
pub async fn create_test_account(db: &DBClient, name: &str, wallet: Option<&str>) -> (Account, String) {
    let (account, api_key) = create_account(&db.pool, name)
        .await
        .expect("Failed to create account");
    if let Some(address) = wallet {
        bind_wallet(&db.pool, account.id, ChainKind::Evm, address)
            .await
            .expect("Failed to bind wallet");
    }
    (account, api_key)
}

pub fn post_json(uri: &str, api_key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = api_key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn admin_post(uri: &str, admin_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(key) = admin_key {
        builder = builder.header(ADMIN_KEY_HEADER, key);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Verifier that reports every reference as a transfer of `amount_rtc`
/// from `SENDER`.
pub fn verifier_paying(amount_rtc: u64) -> MockTransferVerifier {
    let mut verifier = MockTransferVerifier::new();
    verifier
        .expect_verify()
        .returning(move |reference| Ok(transfer(reference, SENDER, amount_rtc)));
    verifier
}
