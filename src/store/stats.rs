//! Stats store: durable snapshots of the identifier model and domain weights

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ProbeError, Result};
use crate::model::{IdentifierModel, ModelKey, PositionStats};

/// Snapshot format version written by this build
pub const SNAPSHOT_VERSION: u32 = 1;

/// One (domain, length) frequency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub domain: String,
    pub length: usize,
    pub positions: Vec<PositionStats>,
}

/// Everything the probing core learns, in its persisted form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// Probes completed across all runs
    #[serde(default)]
    pub total_probes: u64,
    /// Hits confirmed across all runs
    #[serde(default)]
    pub total_hits: u64,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub models: Vec<ModelRecord>,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            total_probes: 0,
            total_hits: 0,
            weights: BTreeMap::new(),
            models: Vec::new(),
        }
    }
}

impl StatsSnapshot {
    /// Capture a model and weight table
    pub fn capture(model: &IdentifierModel, weights: BTreeMap<String, f64>) -> Self {
        let models = model
            .tables()
            .into_iter()
            .map(|(key, positions)| ModelRecord {
                domain: key.domain.clone(),
                length: key.length,
                positions: positions.to_vec(),
            })
            .collect();

        Self {
            weights,
            models,
            ..Self::default()
        }
    }

    /// Rebuild the identifier model. Records whose position count does not
    /// match their length are skipped.
    pub fn to_model(&self) -> IdentifierModel {
        let mut model = IdentifierModel::new();
        for record in &self.models {
            let key = ModelKey::new(record.domain.clone(), record.length);
            if !model.insert_table(key, record.positions.clone()) {
                tracing::warn!(
                    domain = %record.domain,
                    length = record.length,
                    positions = record.positions.len(),
                    "Skipping malformed model record"
                );
            }
        }
        model
    }
}

/// File-backed snapshot store with atomic replace
#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot; `Ok(None)` if no file exists yet
    pub fn load(&self) -> Result<Option<StatsSnapshot>> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ProbeError::persistence(
                    e.to_string(),
                    Some(self.path.to_string_lossy().to_string()),
                ))
            }
        };

        Self::decode(&content).map(Some)
    }

    /// Serialize a snapshot to the on-disk form
    pub fn encode(snapshot: &StatsSnapshot) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(snapshot)
            .map_err(|e| ProbeError::internal(format!("Failed to serialize stats snapshot: {}", e)))
    }

    /// Parse the on-disk form. Invalid bytes of any kind are a `Parse` error.
    pub fn decode(bytes: &[u8]) -> Result<StatsSnapshot> {
        let snapshot: StatsSnapshot =
            serde_json::from_slice(bytes).map_err(|e| ProbeError::parse(e.to_string(), None))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(ProbeError::parse(
                format!("Unsupported stats snapshot version {}", snapshot.version),
                None,
            ));
        }

        Ok(snapshot)
    }

    /// Load the snapshot, replacing a missing or unreadable file with a fresh one
    pub fn load_or_init(&self) -> Result<StatsSnapshot> {
        match self.load() {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => {
                let snapshot = StatsSnapshot::default();
                self.save(&snapshot)?;
                Ok(snapshot)
            }
            Err(ProbeError::Parse { message, .. }) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %message,
                    "Stats snapshot is corrupt, starting from an empty model"
                );
                let snapshot = StatsSnapshot::default();
                self.save(&snapshot)?;
                Ok(snapshot)
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, snapshot: &StatsSnapshot) -> Result<()> {
        self.write_encoded(&Self::encode(snapshot)?)
    }

    /// Write encoded snapshot bytes to a temp file in the same directory,
    /// then rename it over the old one
    pub fn write_encoded(&self, content: &[u8]) -> Result<()> {
        let as_persistence = |e: std::io::Error, path: &Path| {
            ProbeError::persistence(e.to_string(), Some(path.to_string_lossy().to_string()))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| as_persistence(e, parent))?;
        }

        let tmp_path = self.tmp_path();
        {
            let mut file =
                std::fs::File::create(&tmp_path).map_err(|e| as_persistence(e, &tmp_path))?;
            file.write_all(content)
                .and_then(|_| file.sync_all())
                .map_err(|e| as_persistence(e, &tmp_path))?;
        }

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            as_persistence(e, &self.path)
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "stats.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{split_symbols, CodeGenerator};
    use tempfile::TempDir;

    fn trained_model() -> IdentifierModel {
        let mut model = IdentifierModel::new();
        model.record_code("d1", "AABB");
        model.record_code("d1", "ABAB");
        model.record_code("d1", "x9");
        model.record("emoji", &["😀", "🙃", "😀"]);
        model
    }

    #[test]
    fn test_round_trip_preserves_sampling_weights() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        let model = trained_model();
        let weights = BTreeMap::from([("d1".to_string(), 4.5)]);

        store.save(&StatsSnapshot::capture(&model, weights.clone())).unwrap();
        let loaded = store.load().unwrap().unwrap();
        let reloaded = loaded.to_model();

        assert_eq!(reloaded, model);
        assert_eq!(loaded.weights, weights);

        let alphabet = split_symbols("ABx9");
        for position in 0..4 {
            assert_eq!(
                CodeGenerator::new(&model).position_weights("d1", 4, position, &alphabet),
                CodeGenerator::new(&reloaded).position_weights("d1", 4, position, &alphabet),
            );
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "{ \"version\": 1, \"models\": [ { trunc").unwrap();

        let store = StatsStore::new(&path);
        let snapshot = store.load_or_init().unwrap();
        assert!(snapshot.models.is_empty());
        assert!(snapshot.to_model().is_empty());

        // The rewritten file parses cleanly
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn test_non_utf8_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x7b, 0x80]).unwrap();

        let store = StatsStore::new(&path);
        assert!(matches!(store.load(), Err(ProbeError::Parse { .. })));

        let snapshot = store.load_or_init().unwrap();
        assert_eq!(snapshot.total_probes, 0);
        assert!(snapshot.to_model().is_empty());
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn test_future_version_treated_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        let future = StatsSnapshot {
            version: SNAPSHOT_VERSION + 1,
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_string(&future).unwrap()).unwrap();

        let snapshot = StatsStore::new(&path).load_or_init().unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        store.save(&StatsSnapshot::default()).unwrap();
        store.save(&StatsSnapshot::default()).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["stats.json".to_string()]);
    }

    #[test]
    fn test_malformed_record_skipped() {
        let snapshot = StatsSnapshot {
            models: vec![ModelRecord {
                domain: "d1".to_string(),
                length: 3,
                positions: vec![PositionStats::default()],
            }],
            ..Default::default()
        };
        assert!(snapshot.to_model().is_empty());
    }
}
