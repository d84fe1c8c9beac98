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

//! Shared pool configuration, passed explicitly into every worker.

use std::path::PathBuf;
use std::time::Duration;

use minepool_rewards::percent_to_basis_points;

/// Configuration for all pool workers. Built once by the binary from its
/// environment-style arguments and handed to each worker; workers keep no
/// ambient global state.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool fee as a percentage of the block reward (e.g. 10.0).
    pub fee_percent: f64,
    /// Trailing PPLNS window ending at block discovery.
    pub pplns_window: Duration,
    /// Minimum pending balance, in smallest units, before a payout is issued.
    pub min_payout_units: u64,
    /// Confirmations required before a found block matures.
    pub block_maturity_confirmations: i64,
    /// Block reward in smallest units.
    pub block_reward_units: u64,
    /// Confirmations required before a sent payout is considered final.
    pub payout_confirmations: i64,
    /// Interval between chain-height polls and confirmation advancement.
    pub block_poll_interval: Duration,
    /// Interval between reward-engine sweeps over confirmed blocks.
    pub pplns_poll_interval: Duration,
    /// Interval between payout disbursement/confirmation passes.
    pub payout_interval: Duration,
    /// Interval between full sharelog rescans (notify wakeups come earlier).
    pub sharelog_rescan_interval: Duration,
    /// Workers with no share for this long are flipped offline.
    pub worker_offline_timeout: Duration,
    /// Directory the mining server writes sharelog files into.
    pub sharelog_dir: PathBuf,
    /// The mining server's main log, tailed for block-solved lines.
    pub pool_log_path: PathBuf,
    /// Required prefix of a plausible pool address.
    pub address_prefix: String,
    /// Minimum length of a plausible pool address.
    pub address_min_len: usize,
}

impl PoolConfig {
    /// The configured fee in basis points (two-decimal fee percentages are
    /// exact; anything finer is floored).
    pub fn fee_basis_points(&self) -> u64 {
        percent_to_basis_points(self.fee_percent)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fee_percent: 10.0,
            pplns_window: Duration::from_secs(120 * 60),
            min_payout_units: 100 * minepool_rewards::UNITS_PER_COIN,
            block_maturity_confirmations: 100,
            block_reward_units: 10_000 * minepool_rewards::UNITS_PER_COIN,
            payout_confirmations: 6,
            block_poll_interval: Duration::from_secs(5),
            pplns_poll_interval: Duration::from_secs(60),
            payout_interval: Duration::from_secs(3600),
            sharelog_rescan_interval: Duration::from_secs(30),
            worker_offline_timeout: Duration::from_secs(600),
            sharelog_dir: PathBuf::from("/var/log/ckpool"),
            pool_log_path: PathBuf::from("/var/log/ckpool/ckpool.log"),
            address_prefix: "T".to_string(),
            address_min_len: 30,
        }
    }
}
