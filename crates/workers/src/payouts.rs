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

//! Payout orchestration: disburses pending balances over the threshold and
//! tracks each payout through send and on-chain confirmation.
//!
//! A failed send is terminal for that payout row; the participant's balance
//! is untouched, so the next pass naturally retries with a fresh payout.

use anyhow::Result;
use minepool_rewards::{coins_to_units, units_to_coins};

use crate::config::PoolConfig;
use crate::db::DbObj;
use crate::rpc::RpcObj;
use crate::{lease_holder, now_millis};

const LEASE_NAME: &str = "payouts";
const LEASE_TTL_MS: i64 = 600_000;

fn new_payout_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

pub struct PayoutService {
    db: DbObj,
    rpc: RpcObj,
    config: PoolConfig,
    holder: String,
}

impl PayoutService {
    pub fn new(db: DbObj, rpc: RpcObj, config: PoolConfig) -> Self {
        Self { db, rpc, config, holder: lease_holder() }
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!(
            "Payout orchestrator running every {:?}, threshold {} coins",
            self.config.payout_interval,
            units_to_coins(self.config.min_payout_units)
        );

        let mut interval = tokio::time::interval(self.config.payout_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.cycle().await {
                tracing::error!("Payout cycle failed: {e:#}");
            }
        }
    }

    /// One cycle: a disbursement pass followed by a confirmation pass.
    pub async fn cycle(&self) -> Result<()> {
        let now = now_millis();
        if !self.db.try_acquire_lease(LEASE_NAME, &self.holder, now, LEASE_TTL_MS).await? {
            tracing::debug!("Payout lease held elsewhere, skipping cycle");
            return Ok(());
        }

        if let Err(e) = self.disburse().await {
            tracing::error!("Disbursement pass failed: {e:#}");
        }
        if let Err(e) = self.confirm().await {
            tracing::error!("Confirmation pass failed: {e:#}");
        }

        self.db.release_lease(LEASE_NAME, &self.holder).await?;
        Ok(())
    }

    /// Pay every eligible participant, tracking wallet liquidity locally so
    /// one pass never overcommits its budget. Per-user problems skip that
    /// user; the pass continues.
    pub async fn disburse(&self) -> Result<()> {
        let eligible = self.db.eligible_users(self.config.min_payout_units as i64).await?;
        if eligible.is_empty() {
            tracing::debug!("No users eligible for payout");
            return Ok(());
        }
        tracing::info!("Found {} users eligible for payout", eligible.len());

        let wallet_coins = match self.rpc.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!("Failed to get wallet balance: {e}");
                return Ok(());
            }
        };
        let mut budget = coins_to_units(wallet_coins);
        tracing::info!("Pool wallet balance: {wallet_coins} coins");

        for user in eligible {
            let amount = user.pending_balance.max(0) as u64;
            if budget < amount {
                tracing::warn!(
                    "Insufficient wallet balance for {}: need {}, have {}",
                    user.address,
                    units_to_coins(amount),
                    units_to_coins(budget)
                );
                continue;
            }

            match self.rpc.validate_address(&user.address).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::error!("Invalid payout address for {}: skipping", user.address);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to validate address {}: {e}", user.address);
                    continue;
                }
            }

            let id = new_payout_id();
            if let Err(e) =
                self.db.create_payout(&id, &user.address, amount as i64, &user.address, now_millis()).await
            {
                tracing::error!("Failed to create payout for {}: {e}", user.address);
                continue;
            }

            let coins = units_to_coins(amount);
            tracing::info!("Processing payout {id}: {coins} coins to {}", user.address);

            match self
                .rpc
                .send_to_address(&user.address, coins, &format!("Pool payout to {}", user.username))
                .await
            {
                Ok(txid) => {
                    if let Err(e) =
                        self.db.settle_payout(&id, &user.address, amount as i64, &txid).await
                    {
                        // Funds left the wallet but the ledger update failed;
                        // surface loudly for operator reconciliation.
                        tracing::error!("Payout {id} sent as {txid} but not settled: {e}");
                        continue;
                    }
                    budget -= amount;
                    tracing::info!("Sent {coins} coins to {}, txid: {txid}", user.address);
                }
                Err(e) => {
                    tracing::error!("Failed to send payout {id}: {e}");
                    if let Err(e) = self.db.fail_payout(&id).await {
                        tracing::error!("Failed to mark payout {id} failed: {e}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Promote `SENT` payouts to `CONFIRMED` once their transaction reaches
    /// the finality threshold.
    pub async fn confirm(&self) -> Result<()> {
        let sent = self.db.sent_payouts().await?;
        if sent.is_empty() {
            return Ok(());
        }
        tracing::debug!("Checking {} sent payouts for confirmation", sent.len());

        for payout in sent {
            let Some(txid) = payout.txid.as_deref() else { continue };

            let tx = match self.rpc.get_transaction(txid).await {
                Ok(tx) => tx,
                Err(e) => {
                    tracing::error!("Error checking payout {}: {e}", payout.id);
                    continue;
                }
            };

            if tx.confirmations >= self.config.payout_confirmations {
                self.db.confirm_payout(&payout.id, now_millis()).await?;
                tracing::info!(
                    "Payout {} confirmed ({} confirmations)",
                    payout.id,
                    tx.confirmations
                );
            }
        }
        Ok(())
    }
}
