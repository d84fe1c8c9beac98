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

//! Share ingestion: tails sharelog files, validates and normalizes identity,
//! and persists each share with its claimed and actual difficulty.
//!
//! A malformed line never aborts processing of subsequent lines, and no
//! ingestion failure is fatal to the worker.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use serde::Deserialize;

use crate::config::PoolConfig;
use crate::db::{DbObj, NewShare};
use crate::tail::LogTailer;
use crate::{lease_holder, now_millis};

/// Worker name used when a share's label carries no worker suffix.
pub const DEFAULT_WORKER_NAME: &str = "default";

const LEASE_NAME: &str = "share-ingest";
const LEASE_TTL_MS: i64 = 60_000;

/// One sharelog line as the mining server writes it. Unknown fields are
/// ignored; a missing required field fails the parse and skips the line.
#[derive(Debug, Deserialize)]
struct SharelogEntry {
    /// Wallet address of the submitting client.
    username: String,
    /// Combined label, `address` or `address.worker`.
    workername: String,
    /// Claimed difficulty.
    diff: f64,
    /// Actual difficulty of the submitted hash.
    sdiff: f64,
    /// true = accepted, false = rejected.
    result: bool,
    /// `"<unix-seconds>,<nanoseconds>"`.
    createdate: String,
}

/// Split a combined worker label into (address, worker name). Everything
/// after the first separator is the worker name.
pub fn split_worker_label(label: &str) -> (&str, &str) {
    match label.split_once('.') {
        Some((address, worker)) if !worker.is_empty() => (address, worker),
        Some((address, _)) => (address, DEFAULT_WORKER_NAME),
        None => (label, DEFAULT_WORKER_NAME),
    }
}

fn parse_createdate(createdate: &str) -> Option<i64> {
    let (secs, nanos) = match createdate.split_once(',') {
        Some((s, n)) => (s, n),
        None => (createdate, "0"),
    };
    let secs: i64 = secs.trim().parse().ok()?;
    let nanos: i64 = nanos.trim().parse().unwrap_or(0);
    // Extreme-but-parseable seconds must not overflow into a garbage
    // timestamp; treat them as malformed.
    secs.checked_mul(1000)?.checked_add(nanos / 1_000_000)
}

pub struct ShareIngestService {
    db: DbObj,
    config: PoolConfig,
    tailer: LogTailer,
    holder: String,
}

impl ShareIngestService {
    pub fn new(db: DbObj, config: PoolConfig) -> Self {
        let tailer = LogTailer::new(db.clone());
        Self { db, config, tailer, holder: lease_holder() }
    }

    /// Run forever: scan at startup, on filesystem notifications and on the
    /// periodic rescan interval.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Share ingestion watching {}", self.config.sharelog_dir.display());

        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(8);
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if res.is_ok() {
                    let _ = tx.try_send(());
                }
            })
            .context("creating sharelog watcher")?;
        if let Err(e) = watcher.watch(&self.config.sharelog_dir, RecursiveMode::Recursive) {
            tracing::warn!("Cannot watch sharelog dir, relying on rescans: {e}");
        }

        let mut rescan = tokio::time::interval(self.config.sharelog_rescan_interval);
        loop {
            tokio::select! {
                _ = rescan.tick() => {}
                Some(_) = rx.recv() => {}
            }
            match self.cycle().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Processed {n} shares"),
                Err(e) => tracing::error!("Share ingestion cycle failed: {e:#}"),
            }
        }
    }

    /// One full cycle: scan every sharelog, then sweep stale workers
    /// offline. Returns the number of shares stored.
    pub async fn cycle(&mut self) -> Result<u64> {
        let now = now_millis();
        if !self.db.try_acquire_lease(LEASE_NAME, &self.holder, now, LEASE_TTL_MS).await? {
            tracing::debug!("Share ingestion lease held elsewhere, skipping cycle");
            return Ok(0);
        }

        let processed = self.scan_all().await?;

        let cutoff = now - self.config.worker_offline_timeout.as_millis() as i64;
        match self.db.mark_stale_workers_offline(cutoff).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Marked {n} workers offline"),
            Err(e) => tracing::error!("Worker liveness sweep failed: {e}"),
        }

        self.db.release_lease(LEASE_NAME, &self.holder).await?;
        Ok(processed)
    }

    /// Discover and process every sharelog under the configured directory:
    /// hex-named block subdirectories holding `.sharelog` or
    /// `<hex>.sharelog`, plus `*.sharelog` files at the top level.
    pub async fn scan_all(&mut self) -> Result<u64> {
        let dir = self.config.sharelog_dir.clone();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Sharelog directory not found: {}", dir.display());
                return Ok(0);
            }
            Err(e) => return Err(e).with_context(|| format!("read dir {}", dir.display())),
        };

        let mut files: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() && !name.is_empty() && name.chars().all(|c| c.is_ascii_hexdigit())
            {
                let hidden = path.join(".sharelog");
                let named = path.join(format!("{name}.sharelog"));
                if tokio::fs::try_exists(&hidden).await.unwrap_or(false) {
                    files.push(hidden);
                } else if tokio::fs::try_exists(&named).await.unwrap_or(false) {
                    files.push(named);
                }
            } else if file_type.is_file() && name.ends_with(".sharelog") {
                files.push(path);
            }
        }
        files.sort();

        let mut processed = 0;
        for file in files {
            processed += self.process_file(&file).await;
        }
        Ok(processed)
    }

    /// Drain one sharelog and ingest its new lines. Errors are logged and
    /// isolated per line; a tailing failure skips the file until next cycle.
    pub async fn process_file(&mut self, path: &Path) -> u64 {
        let lines = match self.tailer.drain(path).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::error!("Error reading {}: {e:#}", path.display());
                return 0;
            }
        };

        let mut stored = 0;
        for line in lines {
            match self.ingest_line(&line).await {
                Ok(true) => stored += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("Error storing share: {e:#}"),
            }
        }

        // Only now is the batch safe to checkpoint past; a crash earlier
        // redelivers it.
        if let Err(e) = self.tailer.commit(path).await {
            tracing::error!("Error saving checkpoint for {}: {e:#}", path.display());
        }
        stored
    }

    /// Returns Ok(true) when the line produced a share row, Ok(false) when
    /// it was skipped (malformed or implausible address).
    async fn ingest_line(&self, line: &str) -> Result<bool> {
        let entry: SharelogEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping invalid share line: {e}");
                return Ok(false);
            }
        };

        let address = entry.username.as_str();
        if !address.starts_with(&self.config.address_prefix)
            || address.len() < self.config.address_min_len
        {
            tracing::debug!("Skipping share from implausible address {address}");
            return Ok(false);
        }

        let submitted_at = match parse_createdate(&entry.createdate) {
            Some(ts) => ts,
            None => {
                tracing::warn!("Skipping share with bad createdate: {}", entry.createdate);
                return Ok(false);
            }
        };

        let (_, worker_name) = split_worker_label(&entry.workername);

        let now = now_millis();
        self.db.upsert_user(address, now).await?;
        self.db.upsert_worker(address, worker_name).await?;

        // Fractional difficulty below one unit is dropped by policy.
        self.db
            .insert_share(NewShare {
                user_address: address.to_string(),
                worker_name: worker_name.to_string(),
                difficulty: entry.diff.max(0.0).floor() as i64,
                share_difficulty: entry.sdiff.max(0.0).floor() as i64,
                is_valid: entry.result,
                submitted_at,
            })
            .await?;

        self.db.record_share_outcome(address, worker_name, entry.result, submitted_at).await?;
        Ok(true)
    }
}
