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

//! PPLNS (Pay Per Last N Shares) reward distribution math.
//!
//! All monetary arithmetic is done in the chain's smallest currency unit
//! using [`alloy::primitives::U256`] with floor division, never floating
//! point, so proportional splits cannot drift.

pub mod pplns;

pub use pplns::{distribute, Contribution, Distribution, DistributionError, ParticipantReward};

/// Smallest currency units per whole coin.
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Fee denominator: fees are expressed in basis points (1/100 of a percent).
pub const FEE_DENOMINATOR: u64 = 10_000;

/// Convert a coin-denominated amount (as reported by wallet RPC) to smallest
/// units, rounding down.
pub fn coins_to_units(coins: f64) -> u64 {
    if coins <= 0.0 {
        return 0;
    }
    (coins * UNITS_PER_COIN as f64).floor() as u64
}

/// Convert smallest units to a coin-denominated amount for wallet RPC calls
/// and log output.
pub fn units_to_coins(units: u64) -> f64 {
    units as f64 / UNITS_PER_COIN as f64
}

/// Convert a fee percentage (e.g. `10.0` for 10%) to basis points, flooring
/// sub-basis-point precision.
pub fn percent_to_basis_points(percent: f64) -> u64 {
    if percent <= 0.0 {
        return 0;
    }
    (percent * 100.0).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_conversions_floor() {
        assert_eq!(coins_to_units(1.0), 100_000_000);
        assert_eq!(coins_to_units(0.000000019), 1);
        assert_eq!(coins_to_units(-3.0), 0);
        assert_eq!(units_to_coins(150_000_000), 1.5);
    }

    #[test]
    fn percent_scaling() {
        assert_eq!(percent_to_basis_points(10.0), 1000);
        assert_eq!(percent_to_basis_points(0.25), 25);
        assert_eq!(percent_to_basis_points(0.0), 0);
    }
}
