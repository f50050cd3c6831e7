// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Markdown report output

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::Result;

/// What a run analyzes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Whole directory, grouped into feature units
    Folder,
    /// Individually selected files
    Files,
}

impl RunMode {
    fn title(self) -> &'static str {
        match self {
            RunMode::Folder => "# AI Code Analysis Report (Folder)\n",
            RunMode::Files => "# AI Code Analysis Report (Files)\n",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Folder => write!(f, "folder"),
            RunMode::Files => write!(f, "files"),
        }
    }
}

/// Writes report sections as they complete; every section is flushed
pub struct ReportWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ReportWriter {
    /// Create (or truncate) the report and write its title
    pub fn create(path: &Path, mode: RunMode) -> Result<Self> {
        let file = File::create(path)?;
        let mut report = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };
        report.append(mode.title())?;
        Ok(report)
    }

    /// Append the result for a feature unit
    pub fn write_unit(&mut self, name: &str, body: &str) -> Result<()> {
        self.append(&format!("\n\n---\n\n## 💎 Feature Unit: {}\n\n{}", name, body))
    }

    /// Append the result for a single file
    pub fn write_file(&mut self, path: &Path, body: &str) -> Result<()> {
        self.append(&format!("\n\n---\n\n## 📄 File: {}\n\n{}", path.display(), body))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}
