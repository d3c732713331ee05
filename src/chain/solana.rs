use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, trace};

use super::rpc::{JsonRpcEnvelope, RpcError};
use super::{attribute, TransferDescriptor, TransferVerifier, VerifyError};

/// `getTransaction` result in `jsonParsed` encoding; only the fields the
/// verifier reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaTransaction {
    pub slot: Option<u64>,
    pub block_time: Option<i64>,
    pub meta: Option<TransactionMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: u64,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiTokenAmount {
    pub amount: String,
}

/// Canonical SPL mint and reserve wallet a deposit must match.
#[derive(Debug, Clone)]
pub struct SolanaCanonical {
    pub mint: String,
    pub reserve: String,
    pub decimals: u32,
}

#[derive(Default)]
struct AccountDelta {
    owner: Option<String>,
    pre: u128,
    post: u128,
}

fn parse_raw(balance: &TokenBalance) -> Result<u128, VerifyError> {
    balance.ui_token_amount.amount.parse::<u128>().map_err(|_| {
        VerifyError::MalformedResponse(format!(
            "token amount '{}' at account index {}",
            balance.ui_token_amount.amount, balance.account_index
        ))
    })
}

impl SolanaCanonical {
    /// Extracts the canonical transfer into the reserve from a finalized
    /// transaction.
    pub fn extract(
        &self,
        reference: &str,
        tx: &SolanaTransaction,
    ) -> Result<TransferDescriptor, VerifyError> {
        let meta = tx
            .meta
            .as_ref()
            .ok_or_else(|| VerifyError::MalformedResponse("transaction has no meta".into()))?;
        if let Some(err) = meta.err.as_ref().filter(|err| !err.is_null()) {
            return Err(VerifyError::FailedOnChain(err.to_string()));
        }

        // Token accounts keyed by index; a side that is absent counts as zero.
        let mut accounts: HashMap<u64, AccountDelta> = HashMap::new();
        let pre = meta.pre_token_balances.as_deref().unwrap_or_default();
        let post = meta.post_token_balances.as_deref().unwrap_or_default();
        for balance in pre.iter().filter(|b| b.mint == self.mint) {
            let entry = accounts.entry(balance.account_index).or_default();
            entry.pre = parse_raw(balance)?;
            if entry.owner.is_none() {
                entry.owner = balance.owner.clone();
            }
        }
        for balance in post.iter().filter(|b| b.mint == self.mint) {
            let entry = accounts.entry(balance.account_index).or_default();
            entry.post = parse_raw(balance)?;
            if balance.owner.is_some() {
                entry.owner = balance.owner.clone();
            }
        }

        if accounts.is_empty() {
            return Err(VerifyError::NonCanonicalToken);
        }

        let mut deltas: BTreeMap<String, i128> = BTreeMap::new();
        for account in accounts.into_values() {
            let Some(owner) = account.owner.filter(|o| !o.is_empty()) else {
                continue;
            };
            let delta = i128::try_from(account.post)
                .ok()
                .zip(i128::try_from(account.pre).ok())
                .map(|(post, pre)| post - pre)
                .ok_or_else(|| VerifyError::MalformedResponse("token amount overflow".into()))?;
            *deltas.entry(owner).or_insert(0) += delta;
        }
        trace!("Canonical deltas for {}: {:?}", reference, deltas);

        let attribution = attribute(&deltas, &self.reserve, &[])?;

        Ok(TransferDescriptor {
            reference: reference.to_string(),
            token_id: self.mint.clone(),
            reserve_address: self.reserve.clone(),
            sender_address: attribution.sender,
            amount_raw: attribution.reserve_credit,
            decimals: self.decimals,
            ordering_marker: tx.slot,
            block_time: tx.block_time,
        })
    }
}

/// Minimal Solana JSON-RPC client.
pub struct SolanaRpcClient {
    http: reqwest::Client,
    url: String,
}

impl SolanaRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Fetches a transaction at `finalized` commitment. `None` means the node
    /// does not know it yet.
    pub async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<SolanaTransaction>, RpcError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTransaction",
            "params": [
                signature,
                {
                    "encoding": "jsonParsed",
                    "commitment": "finalized",
                    "maxSupportedTransactionVersion": 0
                }
            ]
        });

        let response = self.http.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::transport(format!("HTTP {}", status)));
        }
        let envelope: JsonRpcEnvelope<SolanaTransaction> = response.json().await?;
        envelope.into_result()
    }
}

pub struct SolanaVerifier {
    rpc: SolanaRpcClient,
    canonical: SolanaCanonical,
}

impl SolanaVerifier {
    pub fn new(rpc: SolanaRpcClient, canonical: SolanaCanonical) -> Self {
        Self { rpc, canonical }
    }
}

#[async_trait]
impl TransferVerifier for SolanaVerifier {
    async fn verify(&self, reference: &str) -> Result<TransferDescriptor, VerifyError> {
        debug!("Fetching Solana transaction {}", reference);
        let tx = self
            .rpc
            .get_transaction(reference)
            .await?
            .ok_or(VerifyError::NotFound)?;
        self.canonical.extract(reference, &tx)
    }
}
