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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use minepool_rewards::coins_to_units;
use minepool_workers::blocks::BlockWatcherService;
use minepool_workers::config::PoolConfig;
use minepool_workers::db::{Db, DbObj};
use minepool_workers::engine::RewardEngineService;
use minepool_workers::ingest::ShareIngestService;
use minepool_workers::payouts::PayoutService;
use minepool_workers::rpc::{NodeClient, RpcObj};
use url::Url;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Worker {
    /// Tail sharelogs and record shares.
    ShareIngest,
    /// Detect found blocks and advance their confirmations.
    BlockWatcher,
    /// Compute PPLNS rewards for confirmed blocks.
    Pplns,
    /// Disburse and confirm payouts.
    Payouts,
}

/// Arguments for the pool accounting workers.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct PoolWorkersArgs {
    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// URL of the coin node's JSON-RPC endpoint.
    #[clap(long, env = "NODE_RPC_URL")]
    rpc_url: Url,

    /// RPC username.
    #[clap(long, env = "NODE_RPC_USER")]
    rpc_user: String,

    /// RPC password.
    #[clap(long, env = "NODE_RPC_PASS")]
    rpc_pass: String,

    /// Wallet name, when the node serves multiple wallets.
    #[clap(long, env = "NODE_RPC_WALLET")]
    rpc_wallet: Option<String>,

    /// Directory the mining server writes sharelog files into.
    #[clap(long, env = "CKPOOL_LOG_DIR", default_value = "/var/log/ckpool")]
    sharelog_dir: PathBuf,

    /// The mining server's main log, watched for block-solved lines.
    #[clap(long, env = "CKPOOL_LOG_PATH", default_value = "/var/log/ckpool/ckpool.log")]
    pool_log_path: PathBuf,

    /// Pool fee as a percentage of each block reward.
    #[clap(long, env = "POOL_FEE_PERCENT", default_value = "10.0")]
    fee_percent: f64,

    /// Length of the trailing PPLNS window, in minutes.
    #[clap(long, env = "PPLNS_WINDOW_MINUTES", default_value = "120")]
    pplns_window_minutes: u64,

    /// Minimum pending balance, in coins, before a payout is issued.
    #[clap(long, env = "MIN_PAYOUT_THRESHOLD", default_value = "100.0")]
    min_payout: f64,

    /// Confirmations required before a found block matures.
    #[clap(long, env = "BLOCK_MATURITY_CONFIRMATIONS", default_value = "100")]
    block_maturity_confirmations: i64,

    /// Block reward in coins.
    #[clap(long, env = "BLOCK_REWARD", default_value = "10000.0")]
    block_reward: f64,

    /// Confirmations required before a sent payout is considered final.
    #[clap(long, env = "PAYOUT_CONFIRMATIONS", default_value = "6")]
    payout_confirmations: i64,

    /// Interval in seconds between chain polls by the block watcher.
    #[clap(long, env = "BLOCK_POLL_INTERVAL", default_value = "5")]
    block_poll_interval: u64,

    /// Interval in seconds between reward-engine sweeps.
    #[clap(long, env = "PPLNS_POLL_INTERVAL", default_value = "60")]
    pplns_poll_interval: u64,

    /// Interval in seconds between payout passes.
    #[clap(long, env = "PAYOUT_INTERVAL", default_value = "3600")]
    payout_interval: u64,

    /// Interval in seconds between full sharelog directory rescans.
    #[clap(long, env = "SHARELOG_RESCAN_INTERVAL", default_value = "30")]
    sharelog_rescan_interval: u64,

    /// Seconds without a share before a worker is flipped offline.
    #[clap(long, env = "WORKER_OFFLINE_TIMEOUT", default_value = "600")]
    worker_offline_timeout: u64,

    /// Required prefix of a valid payout address.
    #[clap(long, env = "ADDRESS_PREFIX", default_value = "T")]
    address_prefix: String,

    /// Minimum length of a valid payout address.
    #[clap(long, env = "ADDRESS_MIN_LENGTH", default_value = "30")]
    address_min_length: usize,

    /// Workers to run. Defaults to all of them.
    #[clap(long, value_enum, value_delimiter = ',')]
    workers: Vec<Worker>,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

impl PoolWorkersArgs {
    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            fee_percent: self.fee_percent,
            pplns_window: Duration::from_secs(self.pplns_window_minutes * 60),
            min_payout_units: coins_to_units(self.min_payout),
            block_maturity_confirmations: self.block_maturity_confirmations,
            block_reward_units: coins_to_units(self.block_reward),
            payout_confirmations: self.payout_confirmations,
            block_poll_interval: Duration::from_secs(self.block_poll_interval),
            pplns_poll_interval: Duration::from_secs(self.pplns_poll_interval),
            payout_interval: Duration::from_secs(self.payout_interval),
            sharelog_rescan_interval: Duration::from_secs(self.sharelog_rescan_interval),
            worker_offline_timeout: Duration::from_secs(self.worker_offline_timeout),
            sharelog_dir: self.sharelog_dir.clone(),
            pool_log_path: self.pool_log_path.clone(),
            address_prefix: self.address_prefix.clone(),
            address_min_len: self.address_min_length,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = PoolWorkersArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let config = args.pool_config();

    let db: DbObj = Arc::new(Db::new(&args.db).await.context("connecting to database")?);
    let rpc: RpcObj = Arc::new(
        NodeClient::new(
            args.rpc_url.clone(),
            args.rpc_user.clone(),
            args.rpc_pass.clone(),
            args.rpc_wallet.clone(),
        )
        .context("building node RPC client")?,
    );

    let selected: Vec<Worker> = if args.workers.is_empty() {
        vec![Worker::ShareIngest, Worker::BlockWatcher, Worker::Pplns, Worker::Payouts]
    } else {
        args.workers.clone()
    };
    tracing::info!("Starting pool workers: {selected:?}");

    let mut handles = Vec::new();
    for worker in selected {
        let handle = match worker {
            Worker::ShareIngest => {
                let service = ShareIngestService::new(db.clone(), config.clone());
                tokio::spawn(async move { service.run().await })
            }
            Worker::BlockWatcher => {
                let service = BlockWatcherService::new(db.clone(), rpc.clone(), config.clone())?;
                tokio::spawn(async move { service.run().await })
            }
            Worker::Pplns => {
                let service = RewardEngineService::new(db.clone(), config.clone());
                tokio::spawn(async move { service.run().await })
            }
            Worker::Payouts => {
                let service = PayoutService::new(db.clone(), rpc.clone(), config.clone());
                tokio::spawn(async move { service.run().await })
            }
        };
        handles.push(handle);
    }

    // Workers run forever; a returned handle means one died.
    for handle in handles {
        handle.await.context("worker task panicked")??;
    }
    Ok(())
}
