//! JSON-RPC implementation of the chain capabilities.
//!
//! [`RpcClient`] speaks to a node over HTTP and implements
//! [`WalletSession`]. Signing is delegated to the endpoint via
//! `eth_sendTransaction`, so it must be a node with unlocked accounts or a
//! wallet bridge. [`RpcStreamContract`] adds the contract address and
//! implements [`StreamContract`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ChainError, ChainFuture, ContractCall, StreamContract, TxHash, WalletSession};
use crate::abi;
use crate::address::Address;
use crate::config::ClientConfig;
use crate::stream::{Stream, StreamId};

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    #[serde(default)]
    status: Option<String>,
}

// =============================================================================
// RpcClient
// =============================================================================

/// HTTP JSON-RPC transport plus the wallet queries.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
    receipt_poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl RpcClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            http,
            url: config.rpc_url.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
            receipt_poll_interval: config.receipt_poll_interval,
            confirmation_timeout: config.confirmation_timeout,
        })
    }

    /// Issue one JSON-RPC request and decode its `result`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        tracing::trace!(method, id, "JSON-RPC request");

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, ChainError> {
        let raw: String = self.request(method, params).await?;
        Ok(abi::parse_quantity(&raw)?)
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        call: ContractCall,
    ) -> Result<TxHash, ChainError> {
        let tx = json!({
            "from": from.to_lower_hex(),
            "to": to.to_lower_hex(),
            "data": abi::to_hex_data(&call.calldata()),
            "value": abi::to_quantity(call.value()),
        });
        let raw: String = self.request("eth_sendTransaction", json!([tx])).await?;
        raw.parse()
    }

    async fn poll_receipt(&self, tx: TxHash) -> Result<(), ChainError> {
        loop {
            let receipt: Option<Receipt> = self
                .request("eth_getTransactionReceipt", json!([tx.to_string()]))
                .await?;
            match receipt {
                Some(Receipt { status: Some(s) }) if s == "0x0" => {
                    return Err(ChainError::Reverted(tx));
                }
                Some(_) => return Ok(()),
                None => {
                    tracing::trace!(tx_hash = %tx, "receipt not yet available");
                    tokio::time::sleep(self.receipt_poll_interval).await;
                }
            }
        }
    }

    async fn confirm(&self, tx: TxHash) -> Result<(), ChainError> {
        match tokio::time::timeout(self.confirmation_timeout, self.poll_receipt(tx)).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::ConfirmationTimeout(tx)),
        }
    }
}

impl WalletSession for RpcClient {
    fn accounts(&self) -> ChainFuture<'_, Vec<Address>> {
        Box::pin(async move { self.request("eth_accounts", json!([])).await })
    }

    fn chain_id(&self) -> ChainFuture<'_, u64> {
        Box::pin(async move {
            let id = self.quantity("eth_chainId", json!([])).await?;
            u64::try_from(id).map_err(|_| ChainError::Decode(format!("chain id out of range: {id}")))
        })
    }

    fn balance(&self, account: Address) -> ChainFuture<'_, u128> {
        Box::pin(async move {
            self.quantity(
                "eth_getBalance",
                json!([account.to_lower_hex(), "latest"]),
            )
            .await
        })
    }
}

// =============================================================================
// RpcStreamContract
// =============================================================================

/// The deployed streaming contract, reached through an [`RpcClient`].
#[derive(Clone)]
pub struct RpcStreamContract {
    client: RpcClient,
    address: Address,
}

impl RpcStreamContract {
    pub fn new(client: RpcClient, address: Address) -> Self {
        Self { client, address }
    }

    async fn eth_call(&self, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let call = json!({
            "to": self.address.to_lower_hex(),
            "data": abi::to_hex_data(&data),
        });
        let raw: String = self.client.request("eth_call", json!([call, "latest"])).await?;
        Ok(abi::parse_hex_data(&raw)?)
    }
}

impl StreamContract for RpcStreamContract {
    fn next_stream_id(&self) -> ChainFuture<'_, StreamId> {
        Box::pin(async move {
            let data = self.eth_call(abi::encode_next_stream_id()).await?;
            Ok(abi::decode_u64(&data, 0)?)
        })
    }

    fn stream(&self, id: StreamId) -> ChainFuture<'_, Stream> {
        Box::pin(async move {
            let data = self.eth_call(abi::encode_streams(id)).await?;
            let stream = abi::decode_stream(id, &data)?;
            // Unset mapping slots read back as all zeroes.
            if stream.employer == Address::ZERO {
                return Err(ChainError::UnknownStream(id));
            }
            Ok(stream)
        })
    }

    fn available(&self, id: StreamId) -> ChainFuture<'_, u128> {
        Box::pin(async move {
            let data = self.eth_call(abi::encode_get_available(id)).await?;
            Ok(abi::decode_uint(&data, 0)?)
        })
    }

    fn submit(&self, from: Address, call: ContractCall) -> ChainFuture<'_, TxHash> {
        Box::pin(async move { self.client.send_transaction(from, self.address, call).await })
    }

    fn wait_for_confirmation(&self, tx: TxHash) -> ChainFuture<'_, ()> {
        Box::pin(async move { self.client.confirm(tx).await })
    }
}

impl WalletSession for RpcStreamContract {
    fn accounts(&self) -> ChainFuture<'_, Vec<Address>> {
        self.client.accounts()
    }

    fn chain_id(&self) -> ChainFuture<'_, u64> {
        self.client.chain_id()
    }

    fn balance(&self, account: Address) -> ChainFuture<'_, u128> {
        self.client.balance(account)
    }
}

// =============================================================================
// Tests
// =============================================================================
