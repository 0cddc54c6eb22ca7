// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log for durable storage
//!
//! One JSON object per line: `{"seq": N, "op": {...}}`. Every append is
//! fsynced before it returns. Sequence numbers keep counting across
//! truncation, so entries already covered by a snapshot can be told apart
//! from newer ones.

use depot_core::Operation;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur in WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt WAL entry at line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
}

/// Write-ahead log for durable operation storage
pub struct Wal {
    file: File,
    sequence: u64,
}

impl Wal {
    /// Open or create a WAL at the given path, creating parent directories
    ///
    /// A torn final entry left by a crash is truncated away so new appends
    /// start on a clean line.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let (entries, valid_len) = Self::scan(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
        }

        Ok(Self {
            file,
            sequence: entries.last().map_or(0, |entry| entry.seq),
        })
    }

    /// Append an operation to the log
    pub fn append(&mut self, op: &Operation) -> Result<u64, WalError> {
        let entry = WalEntry {
            seq: self.sequence + 1,
            op: op.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.sync_all()?;
        self.sequence += 1;
        Ok(self.sequence)
    }

    /// Get the current sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Continue numbering after `sequence` when the log holds fewer entries
    pub fn resume_from(&mut self, sequence: u64) {
        self.sequence = self.sequence.max(sequence);
    }

    /// Drop every entry; numbering continues where it was
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replay all operations from the log
    ///
    /// A final line that fails to parse is a write torn by a crash and is
    /// dropped. A bad line anywhere else is corruption.
    pub fn replay(path: &Path) -> Result<Vec<Operation>, WalError> {
        Self::replay_after(path, 0)
    }

    /// Replay the operations numbered above `sequence`
    pub fn replay_after(path: &Path, sequence: u64) -> Result<Vec<Operation>, WalError> {
        let (entries, _) = Self::scan(path)?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.seq > sequence)
            .map(|entry| entry.op)
            .collect())
    }

    /// Parse the log, returning its entries and the byte length of the
    /// well-formed prefix
    fn scan(path: &Path) -> Result<(Vec<WalEntry>, u64), WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut valid_len = 0u64;
        let mut torn: Option<(usize, serde_json::Error)> = None;
        let mut line = String::new();
        let mut number = 0;

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            number += 1;
            if let Some((bad_line, source)) = torn.take() {
                return Err(WalError::Corrupt {
                    line: bad_line,
                    source,
                });
            }
            if line.trim().is_empty() {
                valid_len += read as u64;
                continue;
            }
            // An entry without its newline was never acknowledged
            match serde_json::from_str::<WalEntry>(line.trim_end()) {
                Ok(entry) if line.ends_with('\n') => {
                    entries.push(entry);
                    valid_len += read as u64;
                }
                Ok(_) => {
                    torn = Some((number, serde::de::Error::custom("unterminated entry")));
                }
                Err(e) => torn = Some((number, e)),
            }
        }

        if let Some((bad_line, error)) = torn {
            tracing::warn!(line = bad_line, %error, "dropping torn WAL tail");
        }
        Ok((entries, valid_len))
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct WalEntry {
    seq: u64,
    op: Operation,
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
