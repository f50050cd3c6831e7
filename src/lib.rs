// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Riskscan: AI-assisted critical risk scanner
//!
//! Walks a source tree, groups files into feature units by filename, and asks
//! a hosted Gemini model to report only the risks that can take production
//! down. Results land in a Markdown report; progress streams to the CLI or
//! the web dashboard.

pub mod config;
pub mod error;
pub mod gemini;
pub mod history;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod scanner;
pub mod session;
pub mod web;

pub use config::AppConfig;
pub use error::{Result, RiskscanError};
