use alloy_primitives::{Address, Bytes, U256};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, trace};
use url::Url;

use super::payout::{PayoutError, PayoutExecutor, PayoutStatus};
use crate::chain::evm::fetch_receipt;
use crate::chain::rpc::{with_timeout, RpcError};

sol! {
    function transfer(address to, uint256 amount) external returns (bool);
    function balanceOf(address owner) external view returns (uint256);
}

/// Pays ERC-20 withdrawals from a hot wallet managed by the node
/// (`eth_sendTransaction`), so no key material lives in this process.
pub struct EvmPayoutExecutor {
    client: RpcClient,
    token: Address,
    hot_wallet: Address,
    gas_limit: u64,
    timeout: Duration,
}

impl EvmPayoutExecutor {
    pub fn new(
        rpc_url: Url,
        token: &str,
        hot_wallet: &str,
        gas_limit: u64,
        timeout: Duration,
    ) -> Result<Self, PayoutError> {
        let token = token
            .parse::<Address>()
            .map_err(|e| PayoutError::Rejected(format!("Invalid token address: {}", e)))?;
        let hot_wallet = hot_wallet
            .parse::<Address>()
            .map_err(|e| PayoutError::Rejected(format!("Invalid hot wallet address: {}", e)))?;

        Ok(Self {
            client: ClientBuilder::default().http(rpc_url),
            token,
            hot_wallet,
            gas_limit,
            timeout,
        })
    }

    fn hex_data(call_data: &[u8]) -> String {
        format!("0x{}", hex::encode(call_data))
    }
}

#[async_trait]
impl PayoutExecutor for EvmPayoutExecutor {
    async fn available_balance(&self) -> Result<u128, PayoutError> {
        let call_data = balanceOfCall {
            owner: self.hot_wallet,
        }
        .abi_encode();
        let params = serde_json::json!({
            "to": self.token,
            "data": Self::hex_data(&call_data),
        });

        let call = self.client.request("eth_call", (params, "latest"));
        let output: Bytes = with_timeout(self.timeout, call).await?;
        let balance = U256::try_from_be_slice(&output)
            .ok_or_else(|| RpcError::malformed(format!("balanceOf returned {} bytes", output.len())))?;
        trace!("Hot wallet balance: {}", balance);

        // Anything beyond u128 is more than any payout could need.
        Ok(u128::try_from(balance).unwrap_or(u128::MAX))
    }

    async fn submit(&self, to_address: &str, amount_raw: u128) -> Result<String, PayoutError> {
        let to = to_address
            .parse::<Address>()
            .map_err(|e| PayoutError::Rejected(format!("Invalid destination: {}", e)))?;

        let gas_price: U256 =
            with_timeout(self.timeout, self.client.request_noparams("eth_gasPrice")).await?;
        let nonce: U256 = with_timeout(
            self.timeout,
            self.client
                .request("eth_getTransactionCount", (self.hot_wallet, "pending")),
        )
        .await?;

        let call_data = transferCall {
            to,
            amount: U256::from(amount_raw),
        }
        .abi_encode();

        let tx_params = serde_json::json!({
            "from": self.hot_wallet,
            "to": self.token,
            "gas": format!("0x{:x}", self.gas_limit),
            "gasPrice": format!("0x{:x}", gas_price),
            "nonce": format!("0x{:x}", nonce),
            "data": Self::hex_data(&call_data),
        });
        debug!("Submitting payout of {} to {}", amount_raw, to_address);

        let tx_hash: String = with_timeout(
            self.timeout,
            self.client.request("eth_sendTransaction", [tx_params]),
        )
        .await?;

        // Ensure tx_hash starts with 0x
        let tx_hash = if tx_hash.starts_with("0x") {
            tx_hash.to_ascii_lowercase()
        } else {
            format!("0x{}", tx_hash.to_ascii_lowercase())
        };
        info!("Payout transaction {} sent to {}", tx_hash, to_address);
        Ok(tx_hash)
    }

    async fn status(&self, tx_reference: &str) -> Result<PayoutStatus, PayoutError> {
        let receipt = fetch_receipt(&self.client, tx_reference, self.timeout).await?;
        let status = match receipt {
            None => PayoutStatus::Pending,
            Some(receipt) if receipt.block_number.is_none() => PayoutStatus::Pending,
            Some(receipt) if receipt.status.map(|s| s.to::<u64>()) == Some(1) => {
                PayoutStatus::Confirmed
            }
            Some(_) => PayoutStatus::Reverted,
        };
        Ok(status)
    }
}
