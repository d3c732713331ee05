use anyhow::{bail, ensure, Context};
use config::{Config, Environment, File};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::chain::ChainKind;

/// Loads configuration from a given config file and environment variables.
///
/// Environment variables use the `RTC_BRIDGE` prefix and `__` as the nesting
/// separator, e.g. `RTC_BRIDGE__ADMIN__API_KEY`.
pub fn load_config(config_file_path: Option<&Path>) -> anyhow::Result<AppConfig> {
    // Load .env file if it exists, ignore if not present
    dotenv().ok();

    let mut settings = Config::builder();

    if let Some(path) = config_file_path {
        settings = settings.add_source(File::from(path).required(true));
    }

    settings = settings.add_source(Environment::with_prefix("RTC_BRIDGE").separator("__"));

    let app_config = settings.build()?.try_deserialize::<AppConfig>()?;
    app_config.validate()?;

    Ok(app_config)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub bridges: Vec<BridgeConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut slugs = HashSet::new();
        for bridge in &self.bridges {
            bridge
                .validate()
                .with_context(|| format!("invalid bridge '{}'", bridge.slug))?;
            ensure!(
                slugs.insert(bridge.slug.as_str()),
                "bridge slug '{}' is configured twice",
                bridge.slug
            );
        }
        ensure!(
            self.settlement.batch_size > 0,
            "settlement.batch_size must be positive"
        );
        for bridge in self.bridges.iter().filter(|b| b.payout.is_some()) {
            let row_budget = self.settlement.row_budget_secs(bridge.rpc_timeout_secs);
            ensure!(
                self.settlement.lease_ttl_secs > row_budget,
                "settlement.lease_ttl_secs must exceed {}s, the longest one payout of bridge '{}' \
                 can take (receipt_timeout_secs plus rpc timeouts)",
                row_budget,
                bridge.slug
            );
        }
        Ok(())
    }

    pub fn bridge(&self, slug: &str) -> Option<&BridgeConfig> {
        self.bridges.iter().find(|b| b.slug == slug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://rtc_bridge.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String, // "debug" | "info" | "warn" | "error"
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared secret for admin endpoints. Unset disables them.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Run the periodic sweep inside `serve`.
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: i64,
    pub lease_ttl_secs: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            batch_size: 20,
            lease_ttl_secs: 600,
            receipt_timeout_secs: 60,
            receipt_poll_ms: 2_000,
        }
    }
}

impl SettlementConfig {
    /// Upper bound on the time one payout holds the lease: submission (gas
    /// price, nonce, send), the receipt wait and its last poll.
    pub fn row_budget_secs(&self, rpc_timeout_secs: u64) -> u64 {
        self.receipt_timeout_secs
            .saturating_add(self.receipt_poll_ms.div_ceil(1000))
            .saturating_add(rpc_timeout_secs.saturating_mul(5))
    }
}

fn default_rpc_timeout_secs() -> u64 {
    15
}

fn default_confirmations() -> u64 {
    12
}

fn default_decimals() -> u32 {
    6
}

fn default_withdrawal_prefix() -> String {
    "wd".to_string()
}

fn default_gas_limit() -> u64 {
    100_000
}

/// One bridge between RTC credits and a wrapped token on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// URL segment: the bridge is served under `/api/<slug>-bridge`.
    pub slug: String,
    pub chain: ChainKind,
    /// Human-readable network name reported by `info`.
    pub network: String,
    pub rpc_url: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Mint (Solana) or ERC-20 contract (EVM) of the canonical token.
    pub token_id: String,
    #[serde(default = "default_decimals")]
    pub token_decimals: u32,
    pub reserve_address: String,
    /// Minimum blocks on top of the transfer. Ignored on Solana, which reads
    /// at `finalized` commitment.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default)]
    pub min_deposit: f64,
    pub min_withdraw: f64,
    pub max_withdraw: f64,
    #[serde(default)]
    pub withdraw_fee: f64,
    #[serde(default)]
    pub withdraw_cooldown_secs: u64,
    #[serde(default = "default_withdrawal_prefix")]
    pub withdrawal_id_prefix: String,
    #[serde(default)]
    pub buy_url: Option<String>,
    #[serde(default)]
    pub payout: Option<PayoutConfig>,
}

/// Hot wallet used by the settlement sweep. On EVM chains the address must
/// be an account unlocked on the configured node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutConfig {
    pub hot_wallet_address: String,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

impl BridgeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.slug.is_empty()
                && self
                    .slug
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            "slug must be non-empty lowercase alphanumerics or '-'"
        );
        ensure!(
            self.token_decimals <= 30,
            "token_decimals {} is out of range",
            self.token_decimals
        );
        if self.chain.normalize_address(&self.reserve_address).is_none() {
            bail!("reserve_address is not a valid {} address", self.chain);
        }
        if self.chain.normalize_address(&self.token_id).is_none() {
            bail!("token_id is not a valid {} address", self.chain);
        }
        url::Url::parse(&self.rpc_url).context("rpc_url is not a valid URL")?;

        for (name, value) in [
            ("min_deposit", self.min_deposit),
            ("min_withdraw", self.min_withdraw),
            ("max_withdraw", self.max_withdraw),
            ("withdraw_fee", self.withdraw_fee),
        ] {
            ensure!(
                value.is_finite() && value >= 0.0,
                "{} must be a non-negative number",
                name
            );
        }
        ensure!(self.min_withdraw > 0.0, "min_withdraw must be positive");
        ensure!(
            self.max_withdraw >= self.min_withdraw,
            "max_withdraw must not be below min_withdraw"
        );
        ensure!(
            !self.withdrawal_id_prefix.is_empty(),
            "withdrawal_id_prefix must not be empty"
        );

        if let Some(payout) = &self.payout {
            ensure!(
                self.chain == ChainKind::Evm,
                "payouts are only supported on evm bridges"
            );
            if self.chain.normalize_address(&payout.hot_wallet_address).is_none() {
                bail!("payout.hot_wallet_address is not a valid address");
            }
        }
        Ok(())
    }
}
