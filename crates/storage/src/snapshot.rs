// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Point-in-time state snapshots for WAL truncation
//!
//! A snapshot file is two lines: a header naming the last WAL sequence the
//! state includes plus a CRC32 of the state line, then the state itself.
//! Snapshots are written to a temporary file and renamed into place, so a
//! reader sees either the previous snapshot or the new one.

use crate::state::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),
    #[error("snapshot checksum mismatch: header {expected:08x}, state {actual:08x}")]
    Checksum { expected: u32, actual: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    sequence: u64,
    taken_at: DateTime<Utc>,
    checksum: u32,
}

/// State as of WAL entry `sequence`
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub state: MaterializedState,
}

impl Snapshot {
    /// Current version of the snapshot format
    pub const CURRENT_VERSION: u32 = 1;

    /// Snapshot file kept next to a WAL
    pub fn path_for(wal_path: &Path) -> PathBuf {
        wal_path.with_extension("snapshot")
    }

    /// Atomically replace the snapshot at `path`
    pub fn write(
        path: &Path,
        state: &MaterializedState,
        sequence: u64,
        taken_at: DateTime<Utc>,
    ) -> Result<(), SnapshotError> {
        let body = serde_json::to_string(state)?;
        let header = SnapshotHeader {
            version: Self::CURRENT_VERSION,
            sequence,
            taken_at,
            checksum: crc32fast::hash(body.as_bytes()),
        };

        let temp = path.with_extension("snapshot.tmp");
        {
            let file = File::create(&temp)?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "{}", serde_json::to_string(&header)?)?;
            writeln!(writer, "{}", body)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp, path)?;
        Ok(())
    }

    /// Load and verify the snapshot at `path`; `None` when there is none
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (header, body) = contents
            .split_once('\n')
            .ok_or_else(|| SnapshotError::InvalidFormat("missing state line".to_string()))?;
        let header: SnapshotHeader = serde_json::from_str(header)?;
        if header.version != Self::CURRENT_VERSION {
            return Err(SnapshotError::InvalidFormat(format!(
                "unsupported version {}",
                header.version
            )));
        }

        let body = body
            .strip_suffix('\n')
            .ok_or_else(|| SnapshotError::InvalidFormat("unterminated state line".to_string()))?;
        let actual = crc32fast::hash(body.as_bytes());
        if actual != header.checksum {
            return Err(SnapshotError::Checksum {
                expected: header.checksum,
                actual,
            });
        }

        Ok(Some(Self {
            sequence: header.sequence,
            taken_at: header.taken_at,
            state: serde_json::from_str(body)?,
        }))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
