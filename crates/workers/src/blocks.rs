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

//! Block lifecycle tracking: detection of pool-found blocks and the
//! `PENDING -> CONFIRMED | ORPHANED` confirmation state machine.
//!
//! Detection is log-authoritative: the mining server's "solved" line names
//! the height and the solving worker. Height polling only observes chain
//! advance; pool-authorship verification for polled heights would need to
//! inspect the coinbase payout address and is deliberately left to the log
//! path.

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use regex::Regex;

use crate::config::PoolConfig;
use crate::db::{BlockStatus, DbObj, NewBlock};
use crate::engine;
use crate::ingest::split_worker_label;
use crate::rpc::RpcObj;
use crate::tail::LogTailer;
use crate::{lease_holder, now_millis};

const LEASE_NAME: &str = "block-watcher";
const LEASE_TTL_MS: i64 = 60_000;

const BLOCK_SOLVED_PATTERN: &str = r"Solved and confirmed block (\d+) by (\S+)";

pub struct BlockWatcherService {
    db: DbObj,
    rpc: RpcObj,
    config: PoolConfig,
    tailer: LogTailer,
    solved: Regex,
    last_seen_height: Option<u64>,
    holder: String,
}

impl BlockWatcherService {
    pub fn new(db: DbObj, rpc: RpcObj, config: PoolConfig) -> Result<Self> {
        let tailer = LogTailer::new(db.clone());
        let solved = Regex::new(BLOCK_SOLVED_PATTERN).context("compiling block-solved pattern")?;
        Ok(Self { db, rpc, config, tailer, solved, last_seen_height: None, holder: lease_holder() })
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Block watcher tailing {}", self.config.pool_log_path.display());

        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(8);
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if res.is_ok() {
                    let _ = tx.try_send(());
                }
            })
            .context("creating pool log watcher")?;
        if let Err(e) = watcher.watch(&self.config.pool_log_path, RecursiveMode::NonRecursive) {
            tracing::warn!("Cannot watch pool log, relying on polling: {e}");
        }

        let mut poll = tokio::time::interval(self.config.block_poll_interval);
        loop {
            tokio::select! {
                _ = poll.tick() => {}
                Some(_) = rx.recv() => {}
            }
            if let Err(e) = self.cycle().await {
                tracing::error!("Block watcher cycle failed: {e:#}");
            }
        }
    }

    /// One cycle: scan the pool log for solved blocks, poll chain height,
    /// then advance confirmations for every pending block.
    pub async fn cycle(&mut self) -> Result<()> {
        let now = now_millis();
        if !self.db.try_acquire_lease(LEASE_NAME, &self.holder, now, LEASE_TTL_MS).await? {
            tracing::debug!("Block watcher lease held elsewhere, skipping cycle");
            return Ok(());
        }

        match self.scan_log().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Recorded {n} new pool blocks from log"),
            Err(e) => tracing::error!("Error scanning pool log: {e:#}"),
        }

        if let Err(e) = self.poll_height().await {
            tracing::warn!("Height poll failed: {e:#}");
        }

        self.advance_confirmations().await;

        self.db.release_lease(LEASE_NAME, &self.holder).await?;
        Ok(())
    }

    /// Tail the pool log and record a `PENDING` block for every solved line
    /// whose height is not yet known. Per-line errors are isolated.
    pub async fn scan_log(&mut self) -> Result<u64> {
        let path = self.config.pool_log_path.clone();
        let lines = self.tailer.drain(&path).await?;

        let mut recorded = 0;
        for line in lines {
            let Some(caps) = self.solved.captures(&line) else { continue };
            let height: u64 = match caps[1].parse() {
                Ok(h) => h,
                Err(_) => continue,
            };
            let label = caps[2].to_string();
            tracing::info!("Detected solved block: height={height}, worker={label}");

            match self.db.get_block(height as i64).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Error looking up block {height}: {e}");
                    continue;
                }
            }

            match self.record_block(height, &label).await {
                Ok(()) => recorded += 1,
                Err(e) => tracing::error!("Error recording block {height}: {e:#}"),
            }
        }

        // Checkpoint only once the batch is recorded; redelivered lines are
        // deduplicated by height above.
        self.tailer.commit(&path).await?;
        Ok(recorded)
    }

    /// Resolve the canonical hash for a solved height and persist the block,
    /// attributing the finder when the solving address is a known user.
    async fn record_block(&self, height: u64, label: &str) -> Result<()> {
        let hash = self.rpc.get_block_hash(height).await.context("resolving block hash")?;
        let chain_block = self.rpc.get_block(&hash).await.context("fetching block")?;

        let (address, worker) = split_worker_label(label);
        let finder = match self.db.get_user(address).await? {
            Some(user) => Some(user.address),
            None => {
                tracing::warn!("Block {height} solved by unknown address {address}");
                None
            }
        };
        let finder_worker = finder.as_ref().map(|_| worker.to_string());

        let (difficulty, found_at) = match &chain_block {
            Some(b) => (b.difficulty.floor() as i64, b.time as i64 * 1000),
            None => (0, now_millis()),
        };

        self.db
            .insert_block(NewBlock {
                height: height as i64,
                hash: hash.clone(),
                reward: self.config.block_reward_units as i64,
                difficulty,
                finder_address: finder,
                finder_worker,
                found_at,
            })
            .await?;

        tracing::info!("New pool block recorded: height={height}, hash={hash}, foundBy={label}");
        Ok(())
    }

    /// Observe chain-height advance. Pool authorship of polled heights is
    /// not verified here; the log-based detector is authoritative.
    async fn poll_height(&mut self) -> Result<()> {
        let current = self.rpc.get_block_count().await?;
        let last = match self.last_seen_height {
            Some(last) => last,
            None => {
                tracing::info!("Current block height: {current}");
                self.last_seen_height = Some(current);
                return Ok(());
            }
        };

        if current > last {
            tracing::debug!("New blocks: {last} -> {current}");
            for height in (last + 1)..=current {
                // TODO: verify pool authorship via the coinbase payout
                // address before trusting polled heights.
                tracing::debug!("Deferring authorship check for height {height} to log detection");
            }
            self.last_seen_height = Some(current);
        }
        Ok(())
    }

    /// Advance every `PENDING` block one step: orphan it when the node no
    /// longer knows its hash, otherwise update confirmations and mature it
    /// at the configured threshold. Per-block errors are retried next cycle.
    pub async fn advance_confirmations(&self) {
        let pending = match self.db.pending_blocks().await {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::error!("Error loading pending blocks: {e}");
                return;
            }
        };

        for block in pending {
            if let Err(e) = self.advance_block(&block.hash, block.height).await {
                tracing::error!("Error updating block {}: {e:#}", block.height);
            }
        }
    }

    async fn advance_block(&self, hash: &str, height: i64) -> Result<()> {
        let chain_block = match self.rpc.get_block(hash).await? {
            Some(b) if b.confirmations >= 0 => b,
            // Gone from the node's view, or on a losing fork.
            _ => {
                tracing::info!("Block {height} orphaned");
                self.db.set_block_status(height, BlockStatus::Orphaned).await?;
                return Ok(());
            }
        };

        self.db.set_block_confirmations(height, chain_block.confirmations).await?;

        if chain_block.confirmations >= self.config.block_maturity_confirmations {
            tracing::info!(
                "Block {height} is now mature ({} confirmations)",
                chain_block.confirmations
            );
            self.db.set_block_status(height, BlockStatus::Confirmed).await?;

            if let Err(e) = engine::compute_rewards(&self.db, &self.config, height).await {
                tracing::error!("Reward computation for block {height} failed: {e:#}");
            }
        }
        Ok(())
    }
}
