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

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use minepool_rewards::UNITS_PER_COIN;
use minepool_workers::{
    config::PoolConfig,
    db::{Db, DbObj},
    rpc::{ChainInfo, NodeRpc, RpcBlock, RpcError, RpcTransaction},
};
use tempfile::NamedTempFile;

/// Fresh migrated sqlite database. The temp file must outlive the pool.
pub async fn setup_db() -> (DbObj, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_url = format!("sqlite:{}", temp_file.path().to_str().expect("Invalid temp path"));
    let db: DbObj = Arc::new(Db::new(&db_url).await.expect("Failed to create database"));
    (db, temp_file)
}

/// Config with fast intervals and a low maturity threshold for tests.
pub fn test_config(sharelog_dir: &Path, pool_log_path: &Path) -> PoolConfig {
    PoolConfig {
        fee_percent: 10.0,
        pplns_window: Duration::from_secs(120 * 60),
        min_payout_units: 100 * UNITS_PER_COIN,
        block_maturity_confirmations: 3,
        block_reward_units: 10_000 * UNITS_PER_COIN,
        payout_confirmations: 6,
        block_poll_interval: Duration::from_millis(50),
        pplns_poll_interval: Duration::from_millis(50),
        payout_interval: Duration::from_millis(50),
        sharelog_rescan_interval: Duration::from_millis(50),
        worker_offline_timeout: Duration::from_secs(1),
        sharelog_dir: sharelog_dir.to_path_buf(),
        pool_log_path: pool_log_path.to_path_buf(),
        address_prefix: "T".to_string(),
        address_min_len: 30,
    }
}

/// A plausible pool address: prefix "T", padded past the minimum length.
pub fn test_address(tag: &str) -> String {
    format!("T{tag:A>33}")
}

/// In-memory node double. Shared state is behind mutexes so tests can
/// reshape the chain between worker cycles.
#[derive(Default)]
pub struct MockRpc {
    pub height: Mutex<u64>,
    pub block_hashes: Mutex<HashMap<u64, String>>,
    pub blocks: Mutex<HashMap<String, RpcBlock>>,
    pub wallet_balance: Mutex<f64>,
    pub addresses_valid: Mutex<bool>,
    pub fail_sends: Mutex<bool>,
    pub sent: Mutex<Vec<(String, f64)>>,
    pub tx_confirmations: Mutex<HashMap<String, i64>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self { addresses_valid: Mutex::new(true), ..Default::default() }
    }

    /// Register a block at `height` with the given confirmation count and
    /// discovery time (unix seconds). Returns its hash.
    pub fn add_block(&self, height: u64, confirmations: i64, time: u64) -> String {
        let hash = format!("hash{height:08}");
        self.block_hashes.lock().unwrap().insert(height, hash.clone());
        self.blocks.lock().unwrap().insert(
            hash.clone(),
            RpcBlock { hash: hash.clone(), confirmations, height, time, difficulty: 1000.0, tx: vec![] },
        );
        hash
    }

    pub fn set_confirmations(&self, hash: &str, confirmations: i64) {
        if let Some(block) = self.blocks.lock().unwrap().get_mut(hash) {
            block.confirmations = confirmations;
        }
    }

    /// Drop a block from the node's view, simulating an orphan.
    pub fn orphan_block(&self, hash: &str) {
        self.blocks.lock().unwrap().remove(hash);
    }
}

#[async_trait]
impl NodeRpc for MockRpc {
    async fn get_blockchain_info(&self) -> Result<ChainInfo, RpcError> {
        let height = *self.height.lock().unwrap();
        Ok(ChainInfo {
            chain: "test".to_string(),
            blocks: height,
            headers: height,
            bestblockhash: String::new(),
            difficulty: 1000.0,
            initialblockdownload: false,
        })
    }

    async fn get_block_count(&self) -> Result<u64, RpcError> {
        Ok(*self.height.lock().unwrap())
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.block_hashes.lock().unwrap().get(&height).cloned().ok_or(RpcError::Node {
            code: -8,
            message: "Block height out of range".to_string(),
        })
    }

    async fn get_block(&self, hash: &str) -> Result<Option<RpcBlock>, RpcError> {
        Ok(self.blocks.lock().unwrap().get(hash).cloned())
    }

    async fn get_network_hashps(&self) -> Result<f64, RpcError> {
        Ok(1_000_000.0)
    }

    async fn get_balance(&self) -> Result<f64, RpcError> {
        Ok(*self.wallet_balance.lock().unwrap())
    }

    async fn validate_address(&self, _address: &str) -> Result<bool, RpcError> {
        Ok(*self.addresses_valid.lock().unwrap())
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount: f64,
        _comment: &str,
    ) -> Result<String, RpcError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(RpcError::Node { code: -6, message: "Insufficient funds".to_string() });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((address.to_string(), amount));
        Ok(format!("mocktx{:04}", sent.len()))
    }

    async fn get_transaction(&self, txid: &str) -> Result<RpcTransaction, RpcError> {
        match self.tx_confirmations.lock().unwrap().get(txid) {
            Some(confirmations) => Ok(RpcTransaction {
                confirmations: *confirmations,
                amount: 0.0,
                fee: None,
            }),
            None => Err(RpcError::Node {
                code: -5,
                message: "Invalid or non-wallet transaction id".to_string(),
            }),
        }
    }
}
