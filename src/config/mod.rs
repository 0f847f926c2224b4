//! Engine configuration
//!
//! Read from an optional TOML file, then overridden from the environment:
//!
//! ```toml
//! project = "my-project"
//! zone = "us-central1-a"
//! max_concurrent_operations = 8
//! cleanup = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const PROJECT_ENV: &str = "CLOUDFLOW_PROJECT";
pub const ZONE_ENV: &str = "CLOUDFLOW_ZONE";
pub const MAX_CONCURRENT_OPERATIONS_ENV: &str = "CLOUDFLOW_MAX_CONCURRENT_OPERATIONS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default project for workflows that do not set one
    pub project: String,
    /// Default zone for workflows that do not set one
    pub zone: String,
    /// Bound on sub-operations in flight across a whole run; 0 means unbounded
    pub max_concurrent_operations: usize,
    /// Delete tracked resources when a run ends
    pub cleanup: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            zone: String::new(),
            max_concurrent_operations: 0,
            cleanup: true,
        }
    }
}

impl EngineConfig {
    /// Load from `path` when given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(project) = lookup(PROJECT_ENV).filter(|v| !v.is_empty()) {
            self.project = project;
        }
        if let Some(zone) = lookup(ZONE_ENV).filter(|v| !v.is_empty()) {
            self.zone = zone;
        }
        if let Some(limit) = lookup(MAX_CONCURRENT_OPERATIONS_ENV) {
            self.max_concurrent_operations = limit.trim().parse().with_context(|| {
                format!("{MAX_CONCURRENT_OPERATIONS_ENV} must be a non-negative integer, got {limit:?}")
            })?;
        }
        Ok(())
    }
}
