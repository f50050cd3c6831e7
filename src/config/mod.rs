// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Riskscan

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Model engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// File discovery and grouping
    #[serde(default)]
    pub scan: ScanConfig,

    /// Report output files
    #[serde(default)]
    pub report: ReportConfig,

    /// Prompt templates
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Web UI settings
    #[serde(default)]
    pub web: WebConfig,

    /// Run history settings
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub retries: u32,
    /// Pause between consecutive model calls
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    /// Filename suffixes to include (dot included, case sensitive)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Role words stripped from file stems to get the feature name
    #[serde(default = "default_strip_suffixes")]
    pub strip_suffixes: Vec<String>,
    /// Glob patterns of paths to skip
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_folder_output")]
    pub folder_output: String,
    #[serde(default = "default_files_output")]
    pub files_output: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    /// Template for a feature unit (`{{ name }}`, `{{ code }}`)
    #[serde(default = "default_unit_prompt")]
    pub unit: String,
    /// Template for a single file (`{{ name }}`, `{{ code }}`)
    #[serde(default = "default_file_prompt")]
    pub file: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// Log lines kept for clients that connect mid-run
    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
}

/// Upper bound for `engine.retries`
pub const MAX_RETRIES: u32 = 10;

// Default value functions
fn default_engine_url() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_model() -> String { "gemini-2.5-pro".to_string() }
fn default_api_key_env() -> String { "GOOGLE_API_KEY".to_string() }
fn default_timeout() -> u64 { 600 }
fn default_max_output_tokens() -> u32 { 8192 }
fn default_request_delay() -> u64 { 1000 }
fn default_folder_output() -> String { "folder_analysis_report.md".to_string() }
fn default_files_output() -> String { "file_analysis_report.md".to_string() }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }
fn default_log_buffer() -> usize { 2000 }
fn default_history_path() -> String { "riskscan_history.jsonl".to_string() }

fn default_extensions() -> Vec<String> {
    vec![".java", ".jsp", ".js", ".xml"]
        .into_iter().map(String::from).collect()
}

fn default_strip_suffixes() -> Vec<String> {
    vec!["Controller", "Service", "Mapper"]
        .into_iter().map(String::from).collect()
}

const RISK_BRIEF: &str = "You are a senior architect with twenty years of experience, brought in on an \
emergency to prevent a serious production outage. Find ONLY the critical risks that can cause \
serious problems in production.\n\
[Analysis targets - look for these only]\n\
1. Fatal runtime errors: null dereferences, index out of range, invalid casts and anything else \
that can crash the program.\n\
2. Serious security vulnerabilities: SQL injection, cross-site scripting (XSS), CSRF and other \
code that directly invites an external attack.\n\
3. Performance bottlenecks at scale: queries (full table scans and the like) or loops that will \
clearly slow down once the data grows to tens of thousands of rows.\n\
[Excluded - never mention these]\n\
- Naming style of variables or methods\n\
- Comment style\n\
- Formatting and line breaks\n\
- Minor performance tweaks (e.g. StringBuilder instead of string concatenation)\n\
Report only the essentials, ordered by severity, each tagged `[CRITICAL]`, `[WARNING]` or \
`[ADVISORY]`.";

fn default_unit_prompt() -> String {
    format!("{}\n[Code bundle for feature unit '{{{{ name }}}}']:\n{{{{ code }}}}", RISK_BRIEF)
}

fn default_file_prompt() -> String {
    format!("{}\n[Source file '{{{{ name }}}}']:\n{{{{ code }}}}", RISK_BRIEF)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
            max_output_tokens: default_max_output_tokens(),
            retries: 0,
            request_delay_ms: default_request_delay(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            strip_suffixes: default_strip_suffixes(),
            exclude: Vec::new(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            folder_output: default_folder_output(),
            files_output: default_files_output(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            unit: default_unit_prompt(),
            file: default_file_prompt(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            log_buffer: default_log_buffer(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::RiskscanError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would make every run fail
    pub fn validate(&self) -> crate::Result<()> {
        if self.scan.extensions.is_empty() {
            return Err(crate::RiskscanError::Config("scan.extensions must not be empty".to_string()));
        }
        if self.engine.model.trim().is_empty() {
            return Err(crate::RiskscanError::Config("engine.model must not be empty".to_string()));
        }
        if self.engine.retries > MAX_RETRIES {
            return Err(crate::RiskscanError::Config(format!(
                "engine.retries must be at most {}", MAX_RETRIES
            )));
        }
        if self.engine.api_key_env.trim().is_empty() {
            return Err(crate::RiskscanError::Config("engine.api_key_env must not be empty".to_string()));
        }
        for pattern in &self.scan.exclude {
            glob::Pattern::new(pattern)?;
        }
        let env = minijinja::Environment::new();
        env.template_from_str(&self.prompts.unit)?;
        env.template_from_str(&self.prompts.file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_classic_stack() {
        let config = AppConfig::default();
        assert_eq!(config.scan.extensions, vec![".java", ".jsp", ".js", ".xml"]);
        assert_eq!(config.scan.strip_suffixes, vec!["Controller", "Service", "Mapper"]);
        assert_eq!(config.engine.model, "gemini-2.5-pro");
        assert_eq!(config.engine.api_key_env, "GOOGLE_API_KEY");
        assert_eq!(config.engine.request_delay_ms, 1000);
        assert!(config.prompts.unit.contains("{{ code }}"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.report.folder_output, "folder_analysis_report.md");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("riskscan.json");
        std::fs::write(&path, r#"{"engine": {"model": "gemini-2.5-flash"}, "scan": {"exclude": ["**/target/**"]}}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.engine.model, "gemini-2.5-flash");
        assert_eq!(config.engine.timeout_secs, 600);
        assert_eq!(config.scan.exclude, vec!["**/target/**"]);
        assert_eq!(config.scan.extensions.len(), 4);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("riskscan.json");
        let mut config = AppConfig::default();
        config.web.port = 9191;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.web.port, 9191);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = AppConfig::default();
        config.scan.extensions.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scan.exclude = vec!["[".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.prompts.file = "{{ code".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.retries = MAX_RETRIES;
        assert!(config.validate().is_ok());
        config.engine.retries = MAX_RETRIES + 1;
        assert!(config.validate().is_err());
    }
}
