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

//! Background accounting workers for a ckpool-based mining pool.
//!
//! Four periodically scheduled workers share one persistent store: share
//! ingestion, the block lifecycle tracker, the PPLNS reward engine and the
//! payout orchestrator. All of them run per-cycle with per-item error
//! isolation; no worker's failure halts another.

pub mod blocks;
pub mod config;
pub mod db;
pub mod engine;
pub mod ingest;
pub mod payouts;
pub mod rpc;
pub mod tail;

/// A process-unique identifier used as the holder of advisory leases.
pub(crate) fn lease_holder() -> String {
    format!("{}-{:08x}", std::process::id(), rand::random::<u32>())
}

/// Current wall-clock time in unix milliseconds, the store's timestamp unit.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
