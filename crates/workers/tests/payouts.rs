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
use minepool_workers::db::{BlockRewardRow, DbObj, PayoutStatus};
use minepool_workers::payouts::PayoutService;
use tempfile::TempDir;

use common::{setup_db, test_address, test_config, MockRpc};

/// Credit `coins` to a user's pending balance through the reward path.
async fn credit(db: &DbObj, address: &str, block_height: i64, coins: u64) {
    db.upsert_user(address, 0).await.unwrap();
    db.apply_block_rewards(
        vec![BlockRewardRow {
            block_height,
            user_address: address.to_string(),
            share_percent: 100.0,
            amount: (coins * UNITS_PER_COIN) as i64,
        }],
        0,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn below_threshold_gets_no_payout() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &dir.path().join("pool.log"));

    let alice = test_address("alice");
    // Threshold is 100 coins in the test config.
    credit(&db, &alice, 1, 50).await;

    let rpc = Arc::new(MockRpc::new());
    *rpc.wallet_balance.lock().unwrap() = 1_000.0;

    let service = PayoutService::new(db.clone(), rpc.clone(), config);
    service.cycle().await.unwrap();

    assert!(rpc.sent.lock().unwrap().is_empty());
    assert!(db.payouts_for_user(&alice).await.unwrap().is_empty());
    assert_eq!(
        db.get_user(&alice).await.unwrap().unwrap().pending_balance,
        (50 * UNITS_PER_COIN) as i64
    );
}

#[tokio::test]
async fn successful_payout_moves_pending_to_paid() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &dir.path().join("pool.log"));

    let alice = test_address("alice");
    credit(&db, &alice, 1, 150).await;

    let rpc = Arc::new(MockRpc::new());
    *rpc.wallet_balance.lock().unwrap() = 1_000.0;

    let service = PayoutService::new(db.clone(), rpc.clone(), config);
    service.disburse().await.unwrap();

    assert_eq!(*rpc.sent.lock().unwrap(), vec![(alice.clone(), 150.0)]);

    let user = db.get_user(&alice).await.unwrap().unwrap();
    assert_eq!(user.pending_balance, 0);
    assert_eq!(user.paid_balance, (150 * UNITS_PER_COIN) as i64);

    let payouts = db.payouts_for_user(&alice).await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].status, PayoutStatus::Sent);
    assert_eq!(payouts[0].amount, (150 * UNITS_PER_COIN) as i64);
    assert!(payouts[0].txid.is_some());
}

#[tokio::test]
async fn failed_send_leaves_balance_for_retry() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &dir.path().join("pool.log"));

    let alice = test_address("alice");
    credit(&db, &alice, 1, 200).await;

    let rpc = Arc::new(MockRpc::new());
    *rpc.wallet_balance.lock().unwrap() = 1_000.0;
    *rpc.fail_sends.lock().unwrap() = true;

    let service = PayoutService::new(db.clone(), rpc.clone(), config);
    service.disburse().await.unwrap();

    // The failed attempt is terminal; the balance is untouched.
    let payouts = db.payouts_for_user(&alice).await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].status, PayoutStatus::Failed);
    assert!(payouts[0].txid.is_none());
    assert_eq!(
        db.get_user(&alice).await.unwrap().unwrap().pending_balance,
        (200 * UNITS_PER_COIN) as i64
    );

    // The user stays eligible, so the next pass issues a fresh payout.
    *rpc.fail_sends.lock().unwrap() = false;
    service.disburse().await.unwrap();

    let payouts = db.payouts_for_user(&alice).await.unwrap();
    assert_eq!(payouts.len(), 2);
    assert_eq!(payouts[1].status, PayoutStatus::Sent);
    assert_eq!(db.get_user(&alice).await.unwrap().unwrap().pending_balance, 0);
}

#[tokio::test]
async fn invalid_address_is_skipped() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &dir.path().join("pool.log"));

    let alice = test_address("alice");
    credit(&db, &alice, 1, 150).await;

    let rpc = Arc::new(MockRpc::new());
    *rpc.wallet_balance.lock().unwrap() = 1_000.0;
    *rpc.addresses_valid.lock().unwrap() = false;

    let service = PayoutService::new(db.clone(), rpc.clone(), config);
    service.disburse().await.unwrap();

    assert!(rpc.sent.lock().unwrap().is_empty());
    assert_eq!(
        db.get_user(&alice).await.unwrap().unwrap().pending_balance,
        (150 * UNITS_PER_COIN) as i64
    );
}

#[tokio::test]
async fn wallet_budget_is_never_overcommitted() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &dir.path().join("pool.log"));

    // Two eligible users, wallet only covers the first (address order).
    let first = test_address("aaa");
    let second = test_address("bbb");
    credit(&db, &first, 1, 120).await;
    credit(&db, &second, 2, 130).await;

    let rpc = Arc::new(MockRpc::new());
    *rpc.wallet_balance.lock().unwrap() = 200.0;

    let service = PayoutService::new(db.clone(), rpc.clone(), config);
    service.disburse().await.unwrap();

    assert_eq!(*rpc.sent.lock().unwrap(), vec![(first.clone(), 120.0)]);
    assert_eq!(db.get_user(&first).await.unwrap().unwrap().pending_balance, 0);
    // The second user is skipped, not failed.
    assert!(db.payouts_for_user(&second).await.unwrap().is_empty());
    assert_eq!(
        db.get_user(&second).await.unwrap().unwrap().pending_balance,
        (130 * UNITS_PER_COIN) as i64
    );
}

#[tokio::test]
async fn sent_payout_confirms_at_threshold() {
    let (db, _db_file) = setup_db().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &dir.path().join("pool.log"));

    let alice = test_address("alice");
    credit(&db, &alice, 1, 150).await;

    let rpc = Arc::new(MockRpc::new());
    *rpc.wallet_balance.lock().unwrap() = 1_000.0;

    let service = PayoutService::new(db.clone(), rpc.clone(), config);
    service.disburse().await.unwrap();

    let txid = db.payouts_for_user(&alice).await.unwrap()[0].txid.clone().unwrap();

    // Below the threshold of 6: still SENT.
    rpc.tx_confirmations.lock().unwrap().insert(txid.clone(), 5);
    service.confirm().await.unwrap();
    assert_eq!(db.payouts_for_user(&alice).await.unwrap()[0].status, PayoutStatus::Sent);

    rpc.tx_confirmations.lock().unwrap().insert(txid, 6);
    service.confirm().await.unwrap();

    let payout = &db.payouts_for_user(&alice).await.unwrap()[0];
    assert_eq!(payout.status, PayoutStatus::Confirmed);
    assert!(payout.processed_at.is_some());
}
