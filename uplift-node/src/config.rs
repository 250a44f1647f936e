//! Node configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use uplift_core::{EntityKey, UpliftConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Ad-account entities with spend data. Empty means the share-based
    /// fallback allocator is used.
    #[serde(default)]
    pub ad_entities: Vec<EntityKey>,

    /// Core model/allocator configuration
    #[serde(default)]
    pub uplift: UpliftConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Directory holding snapshots and reports
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Unified per-bucket table (CSV)
    #[serde(default = "default_table_path")]
    pub table_path: PathBuf,

    /// Hours between scheduled runs; used as the default horizon label
    #[serde(default = "default_cadence_hours")]
    pub cadence_hours: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            table_path: default_table_path(),
            cadence_hours: default_cadence_hours(),
        }
    }
}

// Defaults
fn default_artifacts_dir() -> PathBuf { PathBuf::from("artifacts") }
fn default_table_path() -> PathBuf { PathBuf::from("artifacts/unified_view.csv") }
fn default_cadence_hours() -> u32 { 12 }

impl NodeConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.uplift.validate()?;
        Ok(config)
    }

    /// Horizon label derived from the cadence, e.g. `12h`.
    pub fn default_horizon(&self) -> String {
        format!("{}h", self.runner.cadence_hours)
    }

    /// Whether spend-level entities are registered.
    pub fn has_ad_entities(&self) -> bool {
        !self.ad_entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.runner.cadence_hours, 12);
        assert_eq!(config.default_horizon(), "12h");
        assert!(!config.has_ad_entities());
        assert_eq!(config.uplift.constraints.budget_total, 1000.0);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = NodeConfig::load(Path::new("/nonexistent/uplift-node.toml")).unwrap();
        assert_eq!(config.runner.artifacts_dir, PathBuf::from("artifacts"));
    }

    #[test]
    fn test_invalid_uplift_section_rejected() {
        let toml_str = r#"
[uplift.allocator]
alpha_gate = 1.5
"#;
        assert!(NodeConfig::from_toml(toml_str).is_err());
    }
}
