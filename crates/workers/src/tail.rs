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

//! Checkpointed tailing of append-only log files.
//!
//! The tailer keeps one byte offset per path, cached in memory and persisted
//! in the `checkpoints` table. A [`LogTailer::drain`] only stages the new
//! offset; the checkpoint advances when the caller invokes
//! [`LogTailer::commit`] after processing the batch. A crash in between
//! redelivers the whole batch on restart (at-least-once), which downstream
//! idempotent writes absorb; lines are never silently dropped. A file smaller
//! than its checkpoint is treated as rotated/truncated and re-read from
//! byte 0.

use std::{
    collections::HashMap,
    io::SeekFrom,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::db::DbObj;
use crate::now_millis;

pub struct LogTailer {
    db: DbObj,
    /// Committed offsets: everything before them has been processed.
    offsets: HashMap<PathBuf, u64>,
    /// Offsets staged by a drain whose batch is not yet committed.
    pending: HashMap<PathBuf, u64>,
}

impl LogTailer {
    pub fn new(db: DbObj) -> Self {
        Self { db, offsets: HashMap::new(), pending: HashMap::new() }
    }

    /// Lines appended to `path` since the last committed checkpoint. A
    /// missing file yields zero lines without error; any other I/O failure
    /// is returned and the checkpoint is left untouched.
    ///
    /// The returned batch stays uncommitted until [`Self::commit`] is
    /// called; draining again before that replays it.
    pub async fn drain(&mut self, path: &Path) -> Result<Vec<String>> {
        let key = path.to_string_lossy().to_string();

        let mut offset = match self.offsets.get(path) {
            Some(cached) => *cached,
            None => self
                .db
                .get_checkpoint(&key)
                .await
                .context("loading checkpoint")?
                .unwrap_or(0)
                .max(0) as u64,
        };

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("stat {}", path.display())),
        };

        if size < offset {
            tracing::info!("File rotated, resetting checkpoint: {}", path.display());
            offset = 0;
        }

        if size == offset {
            self.offsets.insert(path.to_path_buf(), offset);
            self.pending.remove(path);
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; (size - offset) as usize];
        file.read_exact(&mut buf).await.with_context(|| format!("read {}", path.display()))?;

        let lines: Vec<String> = String::from_utf8_lossy(&buf)
            .split('\n')
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();

        self.offsets.insert(path.to_path_buf(), offset);
        self.pending.insert(path.to_path_buf(), size);
        Ok(lines)
    }

    /// Advance the durable checkpoint past the batch returned by the last
    /// [`Self::drain`]. Must only be called once that batch has been
    /// processed; a no-op when nothing is staged.
    pub async fn commit(&mut self, path: &Path) -> Result<()> {
        let Some(offset) = self.pending.remove(path) else { return Ok(()) };

        self.offsets.insert(path.to_path_buf(), offset);
        self.db
            .set_checkpoint(&path.to_string_lossy(), offset as i64, now_millis())
            .await
            .context("persisting checkpoint")?;
        Ok(())
    }
}
