use alloy_primitives::Address;
use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use crate::api::routes::AppState;
use crate::bridge::service::{Bridge, BridgeService};
use crate::chain::evm::{EvmCanonical, EvmVerifier};
use crate::chain::solana::{SolanaCanonical, SolanaRpcClient, SolanaVerifier};
use crate::chain::{ChainKind, TransferVerifier};
use crate::config::{AppConfig, BridgeConfig, LoggingConfig};
use crate::queue::settlement::SettlementSweep;
use crate::relayer::evm_payout::EvmPayoutExecutor;
use crate::relayer::payout::PayoutExecutor;

/// Installs the global subscriber. `RUST_LOG` overrides `logging.level`.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

pub fn build_verifier(
    config: &BridgeConfig,
    bridge: &Bridge,
) -> anyhow::Result<Arc<dyn TransferVerifier>> {
    let timeout = Duration::from_secs(config.rpc_timeout_secs);
    let verifier: Arc<dyn TransferVerifier> = match bridge.chain {
        ChainKind::Solana => {
            let rpc = SolanaRpcClient::new(config.rpc_url.clone(), timeout)?;
            Arc::new(SolanaVerifier::new(
                rpc,
                SolanaCanonical {
                    mint: bridge.token_id.clone(),
                    reserve: bridge.reserve_address.clone(),
                    decimals: bridge.token_decimals,
                },
            ))
        }
        ChainKind::Evm => {
            let url = Url::parse(&config.rpc_url)
                .with_context(|| format!("Invalid RPC URL for bridge {}", bridge.slug))?;
            let canonical = EvmCanonical {
                token: bridge.token_id.parse::<Address>()?,
                reserve: bridge.reserve_address.parse::<Address>()?,
                decimals: bridge.token_decimals,
                confirmations: bridge.confirmations,
            };
            Arc::new(EvmVerifier::new(url, canonical, timeout))
        }
    };
    Ok(verifier)
}

/// Payout executor for bridges with a configured hot wallet.
pub fn build_executor(config: &BridgeConfig) -> anyhow::Result<Option<Arc<dyn PayoutExecutor>>> {
    let Some(payout) = config.payout.as_ref() else {
        return Ok(None);
    };
    match config.chain {
        ChainKind::Evm => {
            let url = Url::parse(&config.rpc_url)
                .with_context(|| format!("Invalid RPC URL for bridge {}", config.slug))?;
            let executor = EvmPayoutExecutor::new(
                url,
                &config.token_id,
                &payout.hot_wallet_address,
                payout.gas_limit,
                Duration::from_secs(config.rpc_timeout_secs),
            )?;
            Ok(Some(Arc::new(executor)))
        }
        ChainKind::Solana => Ok(None),
    }
}

/// Wires the service and optional sweep of every configured bridge.
pub fn build_states(config: &AppConfig, pool: &SqlitePool) -> anyhow::Result<Vec<AppState>> {
    let mut states = Vec::with_capacity(config.bridges.len());

    for bridge_config in &config.bridges {
        let bridge = Arc::new(
            Bridge::from_config(bridge_config)
                .with_context(|| format!("Invalid bridge {}", bridge_config.slug))?,
        );
        let verifier = build_verifier(bridge_config, &bridge)?;
        let settlement = build_executor(bridge_config)?.map(|executor| {
            Arc::new(SettlementSweep::new(
                pool.clone(),
                bridge.clone(),
                executor,
                config.settlement.clone(),
            ))
        });

        info!(
            "Bridge {} ready on {} ({}), settlement {}",
            bridge.slug,
            bridge.chain,
            bridge.network,
            if settlement.is_some() { "available" } else { "unavailable" }
        );

        states.push(AppState {
            db: pool.clone(),
            service: Arc::new(BridgeService::new(pool.clone(), bridge, verifier)),
            settlement,
            admin_key: config.admin.api_key.clone(),
        });
    }

    Ok(states)
}
