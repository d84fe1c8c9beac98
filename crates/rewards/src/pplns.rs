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

//! Proportional reward splitting for a single confirmed block.

use alloy::primitives::U256;
use thiserror::Error;

use crate::FEE_DENOMINATOR;

/// One participant's summed valid-share difficulty inside the PPLNS window.
#[derive(Debug, Clone)]
pub struct Contribution {
    /// The participant's pool address.
    pub address: String,
    /// Sum of valid share difficulty contributed in the window.
    pub difficulty: U256,
}

/// A participant's computed slice of the distributable reward.
#[derive(Debug, Clone)]
pub struct ParticipantReward {
    /// The participant's pool address.
    pub address: String,
    /// Reward amount in smallest currency units.
    pub amount: U256,
    /// Share of total window difficulty, as a percentage.
    pub share_percent: f64,
}

/// The full distribution for a block: fee, per-participant rewards and the
/// floor-division residual.
#[derive(Debug, Clone)]
pub struct Distribution {
    /// Pool fee withheld from the block reward.
    pub pool_fee: U256,
    /// Block reward minus the pool fee.
    pub distributable: U256,
    /// Total valid difficulty across all contributions.
    pub total_difficulty: U256,
    /// Per-participant rewards, in input order.
    pub rewards: Vec<ParticipantReward>,
}

impl Distribution {
    /// Sum of all participant rewards.
    pub fn distributed(&self) -> U256 {
        self.rewards.iter().fold(U256::ZERO, |acc, r| acc + r.amount)
    }

    /// Residual left with the pool after floor division. Strictly less than
    /// the number of participants.
    pub fn dust(&self) -> U256 {
        self.distributable - self.distributed()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DistributionError {
    #[error("total difficulty in the reward window is zero")]
    ZeroDifficulty,

    #[error("fee of {0} basis points exceeds the whole reward")]
    FeeTooLarge(u64),
}

/// Split `block_reward` across `contributions` proportionally to difficulty.
///
/// The pool fee is `floor(block_reward * fee_bps / 10_000)`; each participant
/// receives `floor(distributable * difficulty / total_difficulty)`. The sum of
/// rewards never exceeds the distributable amount and the residual is not
/// redistributed.
pub fn distribute(
    block_reward: U256,
    fee_bps: u64,
    contributions: &[Contribution],
) -> Result<Distribution, DistributionError> {
    if fee_bps > FEE_DENOMINATOR {
        return Err(DistributionError::FeeTooLarge(fee_bps));
    }

    let total_difficulty =
        contributions.iter().fold(U256::ZERO, |acc, c| acc + c.difficulty);
    if total_difficulty.is_zero() {
        return Err(DistributionError::ZeroDifficulty);
    }

    let pool_fee = block_reward * U256::from(fee_bps) / U256::from(FEE_DENOMINATOR);
    let distributable = block_reward - pool_fee;

    let rewards = contributions
        .iter()
        .map(|c| {
            let amount = distributable * c.difficulty / total_difficulty;
            let share_percent =
                (c.difficulty * U256::from(FEE_DENOMINATOR) / total_difficulty).to::<u64>() as f64
                    / 100.0;
            ParticipantReward { address: c.address.clone(), amount, share_percent }
        })
        .collect();

    Ok(Distribution { pool_fee, distributable, total_difficulty, rewards })
}
