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

mod common;

use std::sync::Arc;

use minepool_rewards::UNITS_PER_COIN;
use minepool_workers::blocks::BlockWatcherService;
use minepool_workers::db::{BlockStatus, NewShare};
use tempfile::TempDir;

use common::{setup_db, test_address, test_config, MockRpc};

const BLOCK_TIME_SECS: u64 = 1_700_000_000;

fn solved_line(height: u64, label: &str) -> String {
    format!("[2026-08-29 12:00:00.123] ckpool[7]: Solved and confirmed block {height} by {label}\n")
}

#[tokio::test]
async fn records_solved_block_from_pool_log() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("pool.log");
    let config = test_config(dir.path(), &log);

    let address = test_address("finder");
    db.upsert_user(&address, 0).await.unwrap();

    let rpc = Arc::new(MockRpc::new());
    rpc.add_block(500, 0, BLOCK_TIME_SECS);
    *rpc.height.lock().unwrap() = 500;

    std::fs::write(&log, solved_line(500, &format!("{address}.rig1"))).unwrap();

    let mut watcher = BlockWatcherService::new(db.clone(), rpc, config.clone()).unwrap();
    watcher.cycle().await.unwrap();

    let block = db.get_block(500).await.unwrap().expect("block recorded");
    assert_eq!(block.status, BlockStatus::Pending);
    assert_eq!(block.hash, "hash00000500");
    assert_eq!(block.reward, config.block_reward_units as i64);
    assert_eq!(block.finder_address.as_deref(), Some(address.as_str()));
    assert_eq!(block.finder_worker.as_deref(), Some("rig1"));
    assert_eq!(block.found_at, BLOCK_TIME_SECS as i64 * 1000);

    // Replayed lines and a second cycle never duplicate the block.
    watcher.cycle().await.unwrap();
    assert!(db.get_block(500).await.unwrap().is_some());
}

#[tokio::test]
async fn unknown_finder_is_recorded_without_attribution() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("pool.log");
    let config = test_config(dir.path(), &log);

    let rpc = Arc::new(MockRpc::new());
    rpc.add_block(501, 0, BLOCK_TIME_SECS);

    std::fs::write(&log, solved_line(501, "Tunknownaddress.rig9")).unwrap();

    let mut watcher = BlockWatcherService::new(db.clone(), rpc, config).unwrap();
    watcher.cycle().await.unwrap();

    let block = db.get_block(501).await.unwrap().expect("block recorded");
    assert!(block.finder_address.is_none());
    assert!(block.finder_worker.is_none());
}

#[tokio::test]
async fn confirmations_advance_until_maturity() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("pool.log");
    let config = test_config(dir.path(), &log);

    let address = test_address("finder");
    db.upsert_user(&address, 0).await.unwrap();
    // One contributor inside the PPLNS window ending at block time.
    db.insert_share(NewShare {
        user_address: address.clone(),
        worker_name: "rig1".to_string(),
        difficulty: 64,
        share_difficulty: 100,
        is_valid: true,
        submitted_at: (BLOCK_TIME_SECS as i64 - 60) * 1000,
    })
    .await
    .unwrap();

    let rpc = Arc::new(MockRpc::new());
    let hash = rpc.add_block(502, 0, BLOCK_TIME_SECS);
    std::fs::write(&log, solved_line(502, &format!("{address}.rig1"))).unwrap();

    let mut watcher = BlockWatcherService::new(db.clone(), rpc.clone(), config).unwrap();
    watcher.cycle().await.unwrap();

    rpc.set_confirmations(&hash, 2);
    watcher.cycle().await.unwrap();
    let block = db.get_block(502).await.unwrap().unwrap();
    assert_eq!(block.status, BlockStatus::Pending);
    assert_eq!(block.confirmations, 2);

    // Maturity threshold is 3 in the test config.
    rpc.set_confirmations(&hash, 3);
    watcher.cycle().await.unwrap();
    let block = db.get_block(502).await.unwrap().unwrap();
    assert_eq!(block.status, BlockStatus::Confirmed);

    // Maturity triggered the reward engine: 10% fee off 10_000 coins, the
    // sole contributor gets the rest.
    let rewards = db.block_rewards(502).await.unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].amount, (9_000 * UNITS_PER_COIN) as i64);
    let user = db.get_user(&address).await.unwrap().unwrap();
    assert_eq!(user.pending_balance, (9_000 * UNITS_PER_COIN) as i64);
}

#[tokio::test]
async fn vanished_block_is_orphaned() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("pool.log");
    let config = test_config(dir.path(), &log);

    let rpc = Arc::new(MockRpc::new());
    let hash = rpc.add_block(503, 1, BLOCK_TIME_SECS);
    std::fs::write(&log, solved_line(503, "Tunknownaddress.rig1")).unwrap();

    let mut watcher = BlockWatcherService::new(db.clone(), rpc.clone(), config).unwrap();
    watcher.cycle().await.unwrap();
    assert_eq!(db.get_block(503).await.unwrap().unwrap().status, BlockStatus::Pending);

    rpc.orphan_block(&hash);
    watcher.cycle().await.unwrap();

    let block = db.get_block(503).await.unwrap().unwrap();
    assert_eq!(block.status, BlockStatus::Orphaned);
    assert!(db.block_rewards(503).await.unwrap().is_empty());
}

#[tokio::test]
async fn negative_confirmations_orphan_the_block() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("pool.log");
    let config = test_config(dir.path(), &log);

    let rpc = Arc::new(MockRpc::new());
    let hash = rpc.add_block(504, 1, BLOCK_TIME_SECS);
    std::fs::write(&log, solved_line(504, "Tunknownaddress.rig1")).unwrap();

    let mut watcher = BlockWatcherService::new(db.clone(), rpc.clone(), config).unwrap();
    watcher.cycle().await.unwrap();

    // The node reports conflicted blocks with confirmations -1.
    rpc.set_confirmations(&hash, -1);
    watcher.cycle().await.unwrap();
    assert_eq!(db.get_block(504).await.unwrap().unwrap().status, BlockStatus::Orphaned);
}
