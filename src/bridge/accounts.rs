use sqlx::SqlitePool;
use tracing::info;

use super::error::BridgeError;
use crate::chain::ChainKind;
use crate::db::database;
use crate::db::models::{Account, BoundWallet};
use crate::utils::hash::{generate_api_key, hash_api_key};

/// Creates an account and returns it with its API key. The key is not
/// stored and cannot be shown again.
pub async fn create_account(pool: &SqlitePool, name: &str) -> Result<(Account, String), BridgeError> {
    let api_key = generate_api_key();
    let account = database::insert_account(pool, name.trim(), &hash_api_key(&api_key)).await?;
    info!("Created account {} ({})", account.name, account.id);
    Ok((account, api_key))
}

/// Binds the account's wallet for a chain kind after validating the address.
pub async fn bind_wallet(
    pool: &SqlitePool,
    account_id: i64,
    chain: ChainKind,
    address: &str,
) -> Result<BoundWallet, BridgeError> {
    let address = chain.normalize_address(address).ok_or_else(|| {
        BridgeError::InvalidAddress(format!("Invalid {} address", chain))
    })?;
    if database::find_account(pool, account_id).await?.is_none() {
        return Err(BridgeError::AccountNotFound);
    }
    let wallet = database::bind_wallet(pool, account_id, chain.as_str(), &address).await?;
    info!("Bound {} wallet {} to account {}", chain, wallet.address, account_id);
    Ok(wallet)
}

/// Resolves an account from a presented API key.
pub async fn authenticate(pool: &SqlitePool, api_key: &str) -> Result<Option<Account>, sqlx::Error> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Ok(None);
    }
    database::find_account_by_key_hash(pool, &hash_api_key(api_key)).await
}
