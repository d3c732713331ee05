use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use alloy_sol_types::{sol, SolEvent};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

use super::rpc::{with_timeout, RpcError};
use super::{attribute, TransferDescriptor, TransferVerifier, VerifyError};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Subset of `eth_getTransactionReceipt` the bridge reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmReceipt {
    pub status: Option<U64>,
    pub block_number: Option<U64>,
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// `eth_getTransactionReceipt`; `None` while the transaction is unmined.
pub async fn fetch_receipt(
    client: &RpcClient,
    tx_hash: &str,
    limit: Duration,
) -> Result<Option<EvmReceipt>, RpcError> {
    let call = client.request("eth_getTransactionReceipt", (tx_hash.to_string(),));
    let receipt: Option<EvmReceipt> = with_timeout(limit, call).await?;
    Ok(receipt)
}

/// Canonical ERC-20 contract, reserve wallet and finality rule.
#[derive(Debug, Clone)]
pub struct EvmCanonical {
    pub token: Address,
    pub reserve: Address,
    pub decimals: u32,
    pub confirmations: u64,
}

impl EvmCanonical {
    /// Extracts the canonical transfer into the reserve from a receipt,
    /// given the chain head observed for the confirmation check.
    pub fn extract(
        &self,
        reference: &str,
        receipt: &EvmReceipt,
        head_block: u64,
    ) -> Result<TransferDescriptor, VerifyError> {
        if receipt.status.map(|s| s.to::<u64>()) != Some(1) {
            return Err(VerifyError::FailedOnChain("transaction reverted".into()));
        }
        let block = receipt
            .block_number
            .map(|b| b.to::<u64>())
            .ok_or(VerifyError::NotFound)?;

        let confirmations = head_block.saturating_sub(block);
        if confirmations < self.confirmations {
            return Err(VerifyError::InsufficientConfirmations {
                confirmations,
                required: self.confirmations,
            });
        }

        let mut deltas: BTreeMap<String, i128> = BTreeMap::new();
        let mut found = false;
        for log in receipt.logs.iter().filter(|log| log.address == self.token) {
            if log.topics.len() < 3 || log.topics[0] != Transfer::SIGNATURE_HASH {
                continue;
            }
            found = true;
            let from = Address::from_word(log.topics[1]);
            let to = Address::from_word(log.topics[2]);
            let value = U256::try_from_be_slice(&log.data)
                .filter(|v| *v <= U256::from(i128::MAX as u128))
                .ok_or_else(|| {
                    VerifyError::MalformedResponse(format!(
                        "transfer value 0x{}",
                        hex::encode(&log.data)
                    ))
                })?;
            let value = value.to::<u128>() as i128;

            let overflow = || VerifyError::MalformedResponse("transfer sum overflow".into());
            let to_entry = deltas.entry(address_hex(&to)).or_insert(0);
            *to_entry = to_entry.checked_add(value).ok_or_else(overflow)?;
            let from_entry = deltas.entry(address_hex(&from)).or_insert(0);
            *from_entry = from_entry.checked_sub(value).ok_or_else(overflow)?;
        }

        if !found {
            return Err(VerifyError::NonCanonicalToken);
        }
        trace!("Canonical deltas for {}: {:?}", reference, deltas);

        let zero = address_hex(&Address::ZERO);
        let reserve = address_hex(&self.reserve);
        let attribution = attribute(&deltas, &reserve, &[zero.as_str()])?;

        Ok(TransferDescriptor {
            reference: reference.to_string(),
            token_id: address_hex(&self.token),
            reserve_address: reserve,
            sender_address: attribution.sender,
            amount_raw: attribution.reserve_credit,
            decimals: self.decimals,
            ordering_marker: Some(block),
            block_time: None,
        })
    }
}

pub struct EvmVerifier {
    client: RpcClient,
    canonical: EvmCanonical,
    timeout: Duration,
}

impl EvmVerifier {
    pub fn new(rpc_url: Url, canonical: EvmCanonical, timeout: Duration) -> Self {
        let client = ClientBuilder::default().http(rpc_url);
        Self {
            client,
            canonical,
            timeout,
        }
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>, RpcError> {
        fetch_receipt(&self.client, tx_hash, self.timeout).await
    }

    async fn head_block(&self) -> Result<u64, RpcError> {
        let call = self.client.request_noparams("eth_blockNumber");
        let head: U64 = with_timeout(self.timeout, call).await?;
        Ok(head.to::<u64>())
    }
}

#[async_trait]
impl TransferVerifier for EvmVerifier {
    async fn verify(&self, reference: &str) -> Result<TransferDescriptor, VerifyError> {
        debug!("Fetching EVM receipt {}", reference);
        let receipt = self.receipt(reference).await?.ok_or(VerifyError::NotFound)?;

        // A confirmation check that cannot be answered rejects the deposit.
        let head = match self.head_block().await {
            Ok(head) => head,
            Err(e) => {
                warn!("Block height unavailable while verifying {}: {}", reference, e);
                return Err(VerifyError::ConfirmationUnavailable(e));
            }
        };

        self.canonical.extract(reference, &receipt, head)
    }
}
