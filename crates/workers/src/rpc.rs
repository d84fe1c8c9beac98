// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! JSON-RPC 1.0 client for the pool's coin daemon.
//!
//! Every call can fail transiently (network, auth, node error code) and is
//! surfaced as a recoverable [`RpcError`]; callers log and retry on their
//! next cycle. Wallet amounts at the wire are coin-denominated floats, as the
//! daemon reports them; conversion to smallest units happens at the caller.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

pub type RpcObj = Arc<dyn NodeRpc + Send + Sync>;

/// Node error code for "block not found".
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("malformed response: {0}")]
    BadResponse(String),
}

impl RpcError {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::Node { code: RPC_INVALID_ADDRESS_OR_KEY, .. })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    pub bestblockhash: String,
    pub difficulty: f64,
    #[serde(default)]
    pub initialblockdownload: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    pub confirmations: i64,
    pub height: u64,
    pub time: u64,
    pub difficulty: f64,
    #[serde(default)]
    pub tx: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub confirmations: i64,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub fee: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AddressValidation {
    isvalid: bool,
}

/// The node methods the workers consume. Mockable in tests.
#[async_trait]
pub trait NodeRpc {
    async fn get_blockchain_info(&self) -> Result<ChainInfo, RpcError>;

    async fn get_block_count(&self) -> Result<u64, RpcError>;

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError>;

    /// Full block lookup by hash. `None` when the node no longer knows the
    /// block (the orphan signal).
    async fn get_block(&self, hash: &str) -> Result<Option<RpcBlock>, RpcError>;

    async fn get_network_hashps(&self) -> Result<f64, RpcError>;

    /// Spendable wallet balance, coin-denominated.
    async fn get_balance(&self) -> Result<f64, RpcError>;

    async fn validate_address(&self, address: &str) -> Result<bool, RpcError>;

    /// Send `amount` coins to `address`; returns the txid.
    async fn send_to_address(
        &self,
        address: &str,
        amount: f64,
        comment: &str,
    ) -> Result<String, RpcError>;

    async fn get_transaction(&self, txid: &str) -> Result<RpcTransaction, RpcError>;
}

/// Reqwest-backed client speaking JSON-RPC 1.0 with HTTP basic auth.
pub struct NodeClient {
    client: reqwest::Client,
    endpoint: Url,
    user: String,
    pass: String,
    next_id: AtomicU64,
}

impl NodeClient {
    /// `wallet`, when set, routes wallet calls through the node's
    /// `/wallet/<name>` endpoint.
    pub fn new(
        url: Url,
        user: String,
        pass: String,
        wallet: Option<String>,
    ) -> Result<Self, RpcError> {
        let endpoint = match wallet {
            Some(name) => url
                .join(&format!("wallet/{name}"))
                .map_err(|e| RpcError::BadResponse(format!("invalid wallet URL: {e}")))?,
            None => url,
        };
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            user,
            pass,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await?;

        // The daemon reports RPC-level failures in the body even on non-2xx
        // statuses, so decode before checking the status.
        let status = resp.status();
        let payload: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(RpcError::Node {
                    code: status.as_u16() as i64,
                    message: format!("HTTP {status}"),
                })
            }
        };

        if let Some(err) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(RpcError::Node {
                code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        let result = payload
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::BadResponse(format!("no result for {method}")))?;
        serde_json::from_value(result).map_err(|e| RpcError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl NodeRpc for NodeClient {
    async fn get_blockchain_info(&self) -> Result<ChainInfo, RpcError> {
        self.call("getblockchaininfo", json!([])).await
    }

    async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<Option<RpcBlock>, RpcError> {
        match self.call("getblock", json!([hash])).await {
            Ok(block) => Ok(Some(block)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_network_hashps(&self) -> Result<f64, RpcError> {
        self.call("getnetworkhashps", json!([])).await
    }

    async fn get_balance(&self) -> Result<f64, RpcError> {
        self.call("getbalance", json!(["*", 1])).await
    }

    async fn validate_address(&self, address: &str) -> Result<bool, RpcError> {
        let validation: AddressValidation =
            self.call("validateaddress", json!([address])).await?;
        Ok(validation.isvalid)
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount: f64,
        comment: &str,
    ) -> Result<String, RpcError> {
        self.call("sendtoaddress", json!([address, amount, comment])).await
    }

    async fn get_transaction(&self, txid: &str) -> Result<RpcTransaction, RpcError> {
        self.call("gettransaction", json!([txid])).await
    }
}
