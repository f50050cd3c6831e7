// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Prompt assembly for risk analysis

use minijinja::{context, Environment};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::PromptConfig;
use crate::Result;

/// Source text of a feature unit, concatenated with per-file headers
#[derive(Debug, Default)]
pub struct CombinedSource {
    pub text: String,
    /// Files that could not be read as UTF-8 text
    pub skipped: Vec<(PathBuf, String)>,
}

/// Concatenate readable files, each preceded by a `--- File: name ---` header
pub fn combine_sources(files: &[PathBuf]) -> CombinedSource {
    let mut combined = CombinedSource::default();

    for path in files {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                combined.text.push_str(&format!("\n\n--- File: {} ---\n", display_name(path)));
                combined.text.push_str(&content);
            }
            Err(e) => {
                warn!("Skipping unreadable file {:?}: {}", path, e);
                combined.skipped.push((path.clone(), e.to_string()));
            }
        }
    }

    combined
}

/// Base name of a path, falling back to the full path
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Renders the unit and single-file prompts from the configured templates
pub struct PromptBuilder {
    env: Environment<'static>,
    unit: String,
    file: String,
}

impl PromptBuilder {
    pub fn new(prompts: &PromptConfig) -> Result<Self> {
        let env = Environment::new();
        env.template_from_str(&prompts.unit)?;
        env.template_from_str(&prompts.file)?;
        Ok(Self {
            env,
            unit: prompts.unit.clone(),
            file: prompts.file.clone(),
        })
    }

    /// Prompt for a feature unit
    pub fn unit_prompt(&self, name: &str, code: &str) -> Result<String> {
        Ok(self.env.render_str(&self.unit, context! { name => name, code => code })?)
    }

    /// Prompt for a single source file
    pub fn file_prompt(&self, name: &str, code: &str) -> Result<String> {
        Ok(self.env.render_str(&self.file, context! { name => name, code => code })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_combine_adds_headers_in_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("UserController.java");
        let b = dir.path().join("UserMapper.xml");
        std::fs::write(&a, "class UserController {}").unwrap();
        std::fs::write(&b, "<mapper/>").unwrap();

        let combined = combine_sources(&[a, b]);
        assert_eq!(
            combined.text,
            "\n\n--- File: UserController.java ---\nclass UserController {}\n\n--- File: UserMapper.xml ---\n<mapper/>"
        );
        assert!(combined.skipped.is_empty());
    }

    #[test]
    fn test_combine_skips_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("app.js");
        let binary = dir.path().join("blob.js");
        let missing = dir.path().join("gone.js");
        std::fs::write(&good, "let a = 1;").unwrap();
        std::fs::write(&binary, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let combined = combine_sources(&[good, binary.clone(), missing.clone()]);
        assert!(combined.text.contains("let a = 1;"));
        assert!(!combined.text.contains("blob.js"));
        assert_eq!(combined.skipped.len(), 2);
        assert_eq!(combined.skipped[0].0, binary);
        assert_eq!(combined.skipped[1].0, missing);
    }

    #[test]
    fn test_default_prompts_carry_brief_and_code() {
        let builder = PromptBuilder::new(&PromptConfig::default()).unwrap();
        let prompt = builder.unit_prompt("User", "<script>alert('x') && a < b</script>").unwrap();

        assert!(prompt.contains("[CRITICAL]"));
        assert!(prompt.contains("[WARNING]"));
        assert!(prompt.contains("[ADVISORY]"));
        assert!(prompt.contains("SQL injection"));
        assert!(prompt.contains("feature unit 'User'"));
        assert!(prompt.ends_with("<script>alert('x') && a < b</script>"));

        let prompt = builder.file_prompt("Login.jsp", "<%= request %>").unwrap();
        assert!(prompt.contains("Source file 'Login.jsp'"));
        assert!(prompt.ends_with("<%= request %>"));
    }

    #[test]
    fn test_custom_templates() {
        let prompts = PromptConfig {
            unit: "U:{{ name }}:{{ code }}".to_string(),
            file: "F:{{ name }}".to_string(),
        };
        let builder = PromptBuilder::new(&prompts).unwrap();
        assert_eq!(builder.unit_prompt("Order", "abc").unwrap(), "U:Order:abc");
        assert_eq!(builder.file_prompt("a.js", "ignored").unwrap(), "F:a.js");
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let prompts = PromptConfig {
            unit: "{% if %}".to_string(),
            file: "ok".to_string(),
        };
        assert!(PromptBuilder::new(&prompts).is_err());
    }
}
