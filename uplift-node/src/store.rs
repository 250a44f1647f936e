//! Artifact directory: versioned JSON snapshots and Markdown reports.
//!
//! Every artifact written during a run is hashed; [`ArtifactStore::finish`]
//! records those digests in `run_manifest.json` under a fresh run id.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

pub const RUN_MANIFEST: &str = "run_manifest.json";

/// Record of one run's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// SHA-256 hex digest per artifact file name
    pub artifacts: BTreeMap<String, String>,
}

/// Reads prior snapshots and writes new ones.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    started_at: DateTime<Utc>,
    written: BTreeMap<String, String>,
}

impl ArtifactStore {
    /// Open (creating if needed) an artifact directory.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating artifact dir {}", dir.display()))?;
        Ok(Self {
            dir,
            started_at: Utc::now(),
            written: BTreeMap::new(),
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read a JSON snapshot; a missing file yields `T::default()`.
    pub fn read_json_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> anyhow::Result<T> {
        let path = self.path(name);
        if !path.exists() {
            debug!(artifact = name, "No prior snapshot; using default");
            return Ok(T::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write pretty JSON and record its digest.
    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        self.write_text(name, &content)
    }

    /// Write a text artifact and record its digest.
    pub fn write_text(&mut self, name: &str, content: &str) -> anyhow::Result<()> {
        let path = self.path(name);
        std::fs::write(&path, content)
            .with_context(|| format!("writing {}", path.display()))?;
        let digest = sha256_hex(content.as_bytes());
        debug!(artifact = name, sha256 = %digest, "Wrote artifact");
        self.written.insert(name.to_string(), digest);
        Ok(())
    }

    /// Write the run manifest and return it.
    pub fn finish(self, command: &str) -> anyhow::Result<RunManifest> {
        let manifest = RunManifest {
            run_id: Uuid::new_v4(),
            command: command.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            artifacts: self.written,
        };
        let path = self.dir.join(RUN_MANIFEST);
        std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(
            run_id = %manifest.run_id,
            artifacts = manifest.artifacts.len(),
            "Run manifest written"
        );
        Ok(manifest)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_missing_snapshot_reads_default() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let map: BTreeMap<String, f64> = store.read_json_or_default("absent.json").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_manifest_lists_written_artifacts() {
        let dir = TempDir::new().unwrap();
        let mut store = ArtifactStore::open(dir.path().join("artifacts")).unwrap();
        store.write_text("report.md", "# Report\n").unwrap();
        store
            .write_json("values.json", &BTreeMap::from([("a".to_string(), 1.0)]))
            .unwrap();

        let manifest = store.finish("run").unwrap();
        assert_eq!(manifest.command, "run");
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.artifacts["report.md"], sha256_hex(b"# Report\n"));

        let on_disk: RunManifest = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("artifacts").join(RUN_MANIFEST)).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk, manifest);
    }
}
