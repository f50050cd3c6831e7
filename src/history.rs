// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ledger of past analysis runs

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::pipeline::RunSummary;
use crate::Result;

/// Append-only JSONL record of finished runs
#[derive(Debug, Clone)]
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a finished run
    pub fn append(&self, summary: &RunSummary) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(summary)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all runs, oldest first. Unparseable lines are logged and skipped.
    pub fn read_all(&self) -> Result<Vec<RunSummary>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunSummary>(&line) {
                Ok(run) => runs.push(run),
                Err(e) => warn!("{}:{}: unreadable run record: {}", self.path.display(), number + 1, e),
            }
        }

        Ok(runs)
    }

    /// Up to `count` runs, newest first
    pub fn get_recent(&self, count: usize) -> Result<Vec<RunSummary>> {
        Ok(self.read_all()?.into_iter().rev().take(count).collect())
    }

    /// Forget every recorded run
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
