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

//! The shared persistent store behind all pool workers.
//!
//! Balance mutations are always relative SQL adjustments, never
//! read-modify-write of a fetched value, so concurrent credits from the
//! reward engine and debits from the payout orchestrator stay correct.
//! Multi-row money movements (reward distribution, payout settlement) each
//! run inside a single transaction.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};

use super::DbError;

pub type DbObj = Arc<dyn PoolDb + Send + Sync>;

/// Lifecycle of a pool-found block. `Confirmed` and `Orphaned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Pending,
    Confirmed,
    Orphaned,
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Orphaned => write!(f, "ORPHANED"),
        }
    }
}

impl FromStr for BlockStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "ORPHANED" => Ok(Self::Orphaned),
            other => Err(DbError::BadRow(format!("unknown block status: {other}"))),
        }
    }
}

/// Lifecycle of one disbursement attempt. `Failed` is terminal and never
/// auto-retried; an eligible participant gets a fresh payout next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutStatus {
    Pending,
    Sent,
    Confirmed,
    Failed,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Sent => write!(f, "SENT"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for PayoutStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SENT" => Ok(Self::Sent),
            "CONFIRMED" => Ok(Self::Confirmed),
            "FAILED" => Ok(Self::Failed),
            other => Err(DbError::BadRow(format!("unknown payout status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub address: String,
    pub username: String,
    pub pending_balance: i64,
    pub paid_balance: i64,
    pub payout_enabled: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub user_address: String,
    pub name: String,
    pub shares_valid: i64,
    pub shares_invalid: i64,
    pub last_seen: Option<i64>,
    pub is_online: bool,
}

/// An immutable share record. Difficulty fields are already truncated to
/// whole units by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct NewShare {
    pub user_address: String,
    pub worker_name: String,
    pub difficulty: i64,
    pub share_difficulty: i64,
    pub is_valid: bool,
    pub submitted_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewBlock {
    pub height: i64,
    pub hash: String,
    pub reward: i64,
    pub difficulty: i64,
    pub finder_address: Option<String>,
    pub finder_worker: Option<String>,
    pub found_at: i64,
}

#[derive(Debug, Clone)]
pub struct BlockRow {
    pub height: i64,
    pub hash: String,
    pub reward: i64,
    pub difficulty: i64,
    pub finder_address: Option<String>,
    pub finder_worker: Option<String>,
    pub status: BlockStatus,
    pub confirmations: i64,
    pub found_at: i64,
}

#[derive(Debug, Clone)]
pub struct BlockRewardRow {
    pub block_height: i64,
    pub user_address: String,
    pub share_percent: f64,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct PayoutRow {
    pub id: String,
    pub user_address: String,
    pub amount: i64,
    pub address: String,
    pub status: PayoutStatus,
    pub txid: Option<String>,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}

#[async_trait]
pub trait PoolDb {
    /// Create a user for this address if none exists. Constraint-based, safe
    /// under concurrent invocation.
    async fn upsert_user(&self, address: &str, now: i64) -> Result<(), DbError>;

    async fn get_user(&self, address: &str) -> Result<Option<UserRow>, DbError>;

    /// Users with `pending_balance >= min_payout` and payouts enabled.
    async fn eligible_users(&self, min_payout: i64) -> Result<Vec<UserRow>, DbError>;

    /// Create a worker for (address, name) if none exists.
    async fn upsert_worker(&self, address: &str, name: &str) -> Result<(), DbError>;

    async fn get_worker(&self, address: &str, name: &str) -> Result<Option<WorkerRow>, DbError>;

    /// Bump the worker's valid or invalid counter and mark it online.
    async fn record_share_outcome(
        &self,
        address: &str,
        name: &str,
        is_valid: bool,
        seen_at: i64,
    ) -> Result<(), DbError>;

    /// Flip workers offline whose `last_seen` predates `cutoff`. Returns the
    /// number of workers flipped.
    async fn mark_stale_workers_offline(&self, cutoff: i64) -> Result<u64, DbError>;

    /// Append one share row.
    async fn insert_share(&self, share: NewShare) -> Result<(), DbError>;

    /// Per-user sum of valid share difficulty inside `[start, end]`, both
    /// ends inclusive.
    async fn sum_valid_difficulty_by_user(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<(String, i64)>, DbError>;

    /// Insert a `PENDING` block if no block exists at this height.
    async fn insert_block(&self, block: NewBlock) -> Result<(), DbError>;

    async fn get_block(&self, height: i64) -> Result<Option<BlockRow>, DbError>;

    async fn pending_blocks(&self) -> Result<Vec<BlockRow>, DbError>;

    async fn set_block_confirmations(&self, height: i64, confirmations: i64)
        -> Result<(), DbError>;

    async fn set_block_status(&self, height: i64, status: BlockStatus) -> Result<(), DbError>;

    /// Heights of `CONFIRMED` blocks with no reward rows yet.
    async fn confirmed_blocks_without_rewards(&self) -> Result<Vec<i64>, DbError>;

    async fn has_block_rewards(&self, height: i64) -> Result<bool, DbError>;

    async fn block_rewards(&self, height: i64) -> Result<Vec<BlockRewardRow>, DbError>;

    /// Insert all reward rows and apply the matching pending-balance
    /// increments in one transaction; either everything applies or nothing
    /// does.
    async fn apply_block_rewards(&self, rewards: Vec<BlockRewardRow>, now: i64)
        -> Result<(), DbError>;

    /// Create a payout row in `PENDING` status.
    async fn create_payout(
        &self,
        id: &str,
        user_address: &str,
        amount: i64,
        address: &str,
        now: i64,
    ) -> Result<(), DbError>;

    /// Mark a payout `SENT` with its txid and move the amount from pending
    /// to paid balance, all in one transaction. Fails without any write if
    /// the pending balance no longer covers the amount.
    async fn settle_payout(
        &self,
        id: &str,
        user_address: &str,
        amount: i64,
        txid: &str,
    ) -> Result<(), DbError>;

    /// Mark a payout `FAILED` (terminal). Balances are untouched.
    async fn fail_payout(&self, id: &str) -> Result<(), DbError>;

    async fn sent_payouts(&self) -> Result<Vec<PayoutRow>, DbError>;

    async fn confirm_payout(&self, id: &str, processed_at: i64) -> Result<(), DbError>;

    async fn payouts_for_user(&self, address: &str) -> Result<Vec<PayoutRow>, DbError>;

    /// Durable log tailer checkpoint for `path`, if one was recorded.
    async fn get_checkpoint(&self, path: &str) -> Result<Option<i64>, DbError>;

    async fn set_checkpoint(&self, path: &str, byte_offset: i64, now: i64) -> Result<(), DbError>;

    /// Acquire (or re-acquire) the advisory lease `name` for `holder` until
    /// `now + ttl_ms`. Returns false when another live holder has it.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: i64,
        ttl_ms: i64,
    ) -> Result<bool, DbError>;

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), DbError>;
}

pub struct Db {
    pool: AnyPool,
}

impl Db {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(20).connect(database_url).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn user_from_row(row: &sqlx::any::AnyRow) -> Result<UserRow, DbError> {
    Ok(UserRow {
        address: row.get("address"),
        username: row.get("username"),
        pending_balance: row.get("pending_balance"),
        paid_balance: row.get("paid_balance"),
        payout_enabled: row.get::<i32, _>("payout_enabled") != 0,
        created_at: row.get("created_at"),
    })
}

fn block_from_row(row: &sqlx::any::AnyRow) -> Result<BlockRow, DbError> {
    Ok(BlockRow {
        height: row.get("height"),
        hash: row.get("hash"),
        reward: row.get("reward"),
        difficulty: row.get("difficulty"),
        finder_address: row.get("finder_address"),
        finder_worker: row.get("finder_worker"),
        status: BlockStatus::from_str(&row.get::<String, _>("status"))?,
        confirmations: row.get("confirmations"),
        found_at: row.get("found_at"),
    })
}

fn payout_from_row(row: &sqlx::any::AnyRow) -> Result<PayoutRow, DbError> {
    Ok(PayoutRow {
        id: row.get("id"),
        user_address: row.get("user_address"),
        amount: row.get("amount"),
        address: row.get("address"),
        status: PayoutStatus::from_str(&row.get::<String, _>("status"))?,
        txid: row.get("txid"),
        created_at: row.get("created_at"),
        processed_at: row.get("processed_at"),
    })
}

#[async_trait]
impl PoolDb for Db {
    async fn upsert_user(&self, address: &str, now: i64) -> Result<(), DbError> {
        let username: String = address.chars().take(16).collect();
        sqlx::query(
            r#"INSERT INTO users (address, username, pending_balance, paid_balance, payout_enabled, created_at)
               VALUES ($1, $2, 0, 0, 1, $3)
               ON CONFLICT (address) DO NOTHING"#,
        )
        .bind(address)
        .bind(username)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, address: &str) -> Result<Option<UserRow>, DbError> {
        let row = sqlx::query(
            r#"SELECT address, username, pending_balance, paid_balance, payout_enabled, created_at
               FROM users WHERE address = $1"#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn eligible_users(&self, min_payout: i64) -> Result<Vec<UserRow>, DbError> {
        let rows = sqlx::query(
            r#"SELECT address, username, pending_balance, paid_balance, payout_enabled, created_at
               FROM users
               WHERE pending_balance >= $1 AND payout_enabled = 1
               ORDER BY address"#,
        )
        .bind(min_payout)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn upsert_worker(&self, address: &str, name: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO workers (user_address, name, shares_valid, shares_invalid, is_online)
               VALUES ($1, $2, 0, 0, 0)
               ON CONFLICT (user_address, name) DO NOTHING"#,
        )
        .bind(address)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_worker(&self, address: &str, name: &str) -> Result<Option<WorkerRow>, DbError> {
        let row = sqlx::query(
            r#"SELECT user_address, name, shares_valid, shares_invalid, last_seen, is_online
               FROM workers WHERE user_address = $1 AND name = $2"#,
        )
        .bind(address)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| WorkerRow {
            user_address: r.get("user_address"),
            name: r.get("name"),
            shares_valid: r.get("shares_valid"),
            shares_invalid: r.get("shares_invalid"),
            last_seen: r.get("last_seen"),
            is_online: r.get::<i32, _>("is_online") != 0,
        }))
    }

    async fn record_share_outcome(
        &self,
        address: &str,
        name: &str,
        is_valid: bool,
        seen_at: i64,
    ) -> Result<(), DbError> {
        let query = if is_valid {
            r#"UPDATE workers
               SET shares_valid = shares_valid + 1, last_seen = $1, is_online = 1
               WHERE user_address = $2 AND name = $3"#
        } else {
            r#"UPDATE workers
               SET shares_invalid = shares_invalid + 1, last_seen = $1, is_online = 1
               WHERE user_address = $2 AND name = $3"#
        };
        sqlx::query(query).bind(seen_at).bind(address).bind(name).execute(&self.pool).await?;
        Ok(())
    }

    async fn mark_stale_workers_offline(&self, cutoff: i64) -> Result<u64, DbError> {
        let res = sqlx::query(
            r#"UPDATE workers SET is_online = 0
               WHERE is_online = 1 AND (last_seen IS NULL OR last_seen < $1)"#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn insert_share(&self, share: NewShare) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO shares (user_address, worker_name, difficulty, share_difficulty, is_valid, submitted_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(share.user_address)
        .bind(share.worker_name)
        .bind(share.difficulty)
        .bind(share.share_difficulty)
        .bind(if share.is_valid { 1i32 } else { 0i32 })
        .bind(share.submitted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sum_valid_difficulty_by_user(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<(String, i64)>, DbError> {
        let rows = sqlx::query(
            r#"SELECT user_address, SUM(difficulty) AS total_difficulty
               FROM shares
               WHERE submitted_at >= $1 AND submitted_at <= $2 AND is_valid = 1
               GROUP BY user_address"#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("user_address"), r.get::<i64, _>("total_difficulty")))
            .collect())
    }

    async fn insert_block(&self, block: NewBlock) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO blocks
               (height, hash, reward, difficulty, finder_address, finder_worker, status, confirmations, found_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
               ON CONFLICT (height) DO NOTHING"#,
        )
        .bind(block.height)
        .bind(block.hash)
        .bind(block.reward)
        .bind(block.difficulty)
        .bind(block.finder_address)
        .bind(block.finder_worker)
        .bind(BlockStatus::Pending.to_string())
        .bind(block.found_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_block(&self, height: i64) -> Result<Option<BlockRow>, DbError> {
        let row = sqlx::query(
            r#"SELECT height, hash, reward, difficulty, finder_address, finder_worker, status, confirmations, found_at
               FROM blocks WHERE height = $1"#,
        )
        .bind(height)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| block_from_row(&r)).transpose()
    }

    async fn pending_blocks(&self) -> Result<Vec<BlockRow>, DbError> {
        let rows = sqlx::query(
            r#"SELECT height, hash, reward, difficulty, finder_address, finder_worker, status, confirmations, found_at
               FROM blocks WHERE status = $1 ORDER BY height"#,
        )
        .bind(BlockStatus::Pending.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn set_block_confirmations(
        &self,
        height: i64,
        confirmations: i64,
    ) -> Result<(), DbError> {
        sqlx::query(r#"UPDATE blocks SET confirmations = $1 WHERE height = $2"#)
            .bind(confirmations)
            .bind(height)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_block_status(&self, height: i64, status: BlockStatus) -> Result<(), DbError> {
        sqlx::query(r#"UPDATE blocks SET status = $1 WHERE height = $2"#)
            .bind(status.to_string())
            .bind(height)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn confirmed_blocks_without_rewards(&self) -> Result<Vec<i64>, DbError> {
        let rows = sqlx::query(
            r#"SELECT height FROM blocks b
               WHERE status = $1
                 AND NOT EXISTS (SELECT 1 FROM block_rewards r WHERE r.block_height = b.height)
               ORDER BY height"#,
        )
        .bind(BlockStatus::Confirmed.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("height")).collect())
    }

    async fn has_block_rewards(&self, height: i64) -> Result<bool, DbError> {
        let row =
            sqlx::query(r#"SELECT COUNT(*) AS cnt FROM block_rewards WHERE block_height = $1"#)
                .bind(height)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get::<i64, _>("cnt") > 0)
    }

    async fn block_rewards(&self, height: i64) -> Result<Vec<BlockRewardRow>, DbError> {
        let rows = sqlx::query(
            r#"SELECT block_height, user_address, share_percent, amount
               FROM block_rewards WHERE block_height = $1 ORDER BY amount DESC"#,
        )
        .bind(height)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| BlockRewardRow {
                block_height: r.get("block_height"),
                user_address: r.get("user_address"),
                share_percent: r.get("share_percent"),
                amount: r.get("amount"),
            })
            .collect())
    }

    async fn apply_block_rewards(
        &self,
        rewards: Vec<BlockRewardRow>,
        now: i64,
    ) -> Result<(), DbError> {
        if rewards.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for reward in &rewards {
            sqlx::query(
                r#"INSERT INTO block_rewards (block_height, user_address, share_percent, amount, created_at)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(reward.block_height)
            .bind(&reward.user_address)
            .bind(reward.share_percent)
            .bind(reward.amount)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"UPDATE users SET pending_balance = pending_balance + $1 WHERE address = $2"#,
            )
            .bind(reward.amount)
            .bind(&reward.user_address)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_payout(
        &self,
        id: &str,
        user_address: &str,
        amount: i64,
        address: &str,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO payouts (id, user_address, amount, address, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(id)
        .bind(user_address)
        .bind(amount)
        .bind(address)
        .bind(PayoutStatus::Pending.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn settle_payout(
        &self,
        id: &str,
        user_address: &str,
        amount: i64,
        txid: &str,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"UPDATE payouts SET status = $1, txid = $2 WHERE id = $3"#)
            .bind(PayoutStatus::Sent.to_string())
            .bind(txid)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // The guard keeps pending_balance non-negative even if a concurrent
        // settlement raced this one.
        let res = sqlx::query(
            r#"UPDATE users
               SET pending_balance = pending_balance - $1, paid_balance = paid_balance + $1
               WHERE address = $2 AND pending_balance >= $1"#,
        )
        .bind(amount)
        .bind(user_address)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(DbError::InsufficientBalance {
                address: user_address.to_string(),
                amount,
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fail_payout(&self, id: &str) -> Result<(), DbError> {
        sqlx::query(r#"UPDATE payouts SET status = $1 WHERE id = $2"#)
            .bind(PayoutStatus::Failed.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sent_payouts(&self) -> Result<Vec<PayoutRow>, DbError> {
        let rows = sqlx::query(
            r#"SELECT id, user_address, amount, address, status, txid, created_at, processed_at
               FROM payouts WHERE status = $1 AND txid IS NOT NULL ORDER BY created_at"#,
        )
        .bind(PayoutStatus::Sent.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payout_from_row).collect()
    }

    async fn confirm_payout(&self, id: &str, processed_at: i64) -> Result<(), DbError> {
        sqlx::query(r#"UPDATE payouts SET status = $1, processed_at = $2 WHERE id = $3"#)
            .bind(PayoutStatus::Confirmed.to_string())
            .bind(processed_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn payouts_for_user(&self, address: &str) -> Result<Vec<PayoutRow>, DbError> {
        let rows = sqlx::query(
            r#"SELECT id, user_address, amount, address, status, txid, created_at, processed_at
               FROM payouts WHERE user_address = $1 ORDER BY created_at"#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payout_from_row).collect()
    }

    async fn get_checkpoint(&self, path: &str) -> Result<Option<i64>, DbError> {
        let row = sqlx::query(r#"SELECT byte_offset FROM checkpoints WHERE path = $1"#)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("byte_offset")))
    }

    async fn set_checkpoint(&self, path: &str, byte_offset: i64, now: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO checkpoints (path, byte_offset, updated_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (path) DO UPDATE SET
                   byte_offset = EXCLUDED.byte_offset,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(path)
        .bind(byte_offset)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: i64,
        ttl_ms: i64,
    ) -> Result<bool, DbError> {
        let res = sqlx::query(
            r#"INSERT INTO leases (name, holder, expires_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (name) DO UPDATE SET
                   holder = EXCLUDED.holder,
                   expires_at = EXCLUDED.expires_at
               WHERE leases.holder = EXCLUDED.holder OR leases.expires_at < $4"#,
        )
        .bind(name)
        .bind(holder)
        .bind(now + ttl_ms)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), DbError> {
        sqlx::query(r#"DELETE FROM leases WHERE name = $1 AND holder = $2"#)
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
