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

//! The PPLNS reward engine: credits each participant's proportional slice of
//! a confirmed block's distributable reward.
//!
//! `compute_rewards` is idempotent (existing reward rows short-circuit it)
//! and all-or-nothing (rows and balance increments commit in one
//! transaction). A failed computation leaves the block eligible for retry.

use alloy::primitives::U256;
use anyhow::{bail, Context, Result};
use minepool_rewards::{distribute, units_to_coins, Contribution};

use crate::config::PoolConfig;
use crate::db::{BlockRewardRow, BlockStatus, DbObj};
use crate::{lease_holder, now_millis};

const LEASE_NAME: &str = "pplns-engine";
const LEASE_TTL_MS: i64 = 300_000;

/// Compute and credit PPLNS rewards for the block at `height`.
pub async fn compute_rewards(db: &DbObj, config: &PoolConfig, height: i64) -> Result<()> {
    let block = db
        .get_block(height)
        .await?
        .with_context(|| format!("block {height} not found"))?;

    if block.status != BlockStatus::Confirmed {
        bail!("block {height} is not confirmed (status: {})", block.status);
    }

    if db.has_block_rewards(height).await? {
        tracing::info!("Rewards already calculated for block {height}");
        return Ok(());
    }

    // Trailing window ending at block discovery, inclusive both ends.
    let window_end = block.found_at;
    let window_start = window_end - config.pplns_window.as_millis() as i64;

    let contributions: Vec<Contribution> = db
        .sum_valid_difficulty_by_user(window_start, window_end)
        .await?
        .into_iter()
        .filter(|(_, difficulty)| *difficulty > 0)
        .map(|(address, difficulty)| Contribution {
            address,
            difficulty: U256::from(difficulty as u64),
        })
        .collect();

    let dist = distribute(
        U256::from(block.reward as u64),
        config.fee_basis_points(),
        &contributions,
    )
    .with_context(|| format!("distributing reward for block {height}"))?;

    tracing::info!(
        "Block {height}: reward {} coins, fee {} coins, distributable {} coins, {} participants, dust {}",
        units_to_coins(block.reward as u64),
        units_to_coins(dist.pool_fee.to::<u64>()),
        units_to_coins(dist.distributable.to::<u64>()),
        dist.rewards.len(),
        dist.dust(),
    );

    let rows: Vec<BlockRewardRow> = dist
        .rewards
        .iter()
        .map(|r| BlockRewardRow {
            block_height: height,
            user_address: r.address.clone(),
            share_percent: r.share_percent,
            amount: r.amount.to::<u64>() as i64,
        })
        .collect();

    db.apply_block_rewards(rows, now_millis()).await.context("crediting rewards")?;

    tracing::info!("Rewards distributed for block {height}");
    Ok(())
}

/// Periodic sweep that computes rewards for every confirmed block still
/// missing them. Covers blocks confirmed while the engine was down, plus the
/// direct invocation from the block watcher.
pub struct RewardEngineService {
    db: DbObj,
    config: PoolConfig,
    holder: String,
}

impl RewardEngineService {
    pub fn new(db: DbObj, config: PoolConfig) -> Self {
        Self { db, config, holder: lease_holder() }
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!(
            "PPLNS engine polling every {:?}, window {:?}",
            self.config.pplns_poll_interval,
            self.config.pplns_window
        );

        let mut poll = tokio::time::interval(self.config.pplns_poll_interval);
        loop {
            poll.tick().await;
            if let Err(e) = self.cycle().await {
                tracing::error!("PPLNS cycle failed: {e:#}");
            }
        }
    }

    /// One sweep over unprocessed confirmed blocks. Per-block failures are
    /// logged and left for the next sweep.
    pub async fn cycle(&self) -> Result<()> {
        let now = now_millis();
        if !self.db.try_acquire_lease(LEASE_NAME, &self.holder, now, LEASE_TTL_MS).await? {
            tracing::debug!("PPLNS lease held elsewhere, skipping cycle");
            return Ok(());
        }

        let heights = self.db.confirmed_blocks_without_rewards().await?;
        if !heights.is_empty() {
            tracing::info!("Found {} unprocessed confirmed blocks", heights.len());
        }

        for height in heights {
            if let Err(e) = compute_rewards(&self.db, &self.config, height).await {
                tracing::error!("Reward computation for block {height} failed: {e:#}");
            }
        }

        self.db.release_lease(LEASE_NAME, &self.holder).await?;
        Ok(())
    }
}
