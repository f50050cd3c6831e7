// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Riskscan

use thiserror::Error;

/// Result type alias for Riskscan operations
pub type Result<T> = std::result::Result<T, RiskscanError>;

/// Riskscan error types
#[derive(Error, Debug)]
pub enum RiskscanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Model returned no text ({0})")]
    EmptyResponse(String),

    #[error("API key not found: set {0} in the environment or a .env file")]
    MissingApiKey(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("An analysis is already running")]
    Busy,
}
