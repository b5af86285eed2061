//! Staleness store: digests observed after each successful transformation
//!
//! Records are keyed by transformation identity and persisted as pretty JSON
//! in the build root. Every write goes to a sibling temporary file which is
//! then renamed over the store, one writer at a time.

use crate::artifact::ArtifactId;
use crate::digest::Digest;
use crate::error::{BeaverError, BeaverResult};
use crate::transform::TransformId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default store file name relative to the build root
pub const DEFAULT_DIGEST_FILE: &str = ".beaverdigests";

/// Current store format version
pub const STORE_VERSION: u32 = 1;

/// Digests observed after the last successful run of one transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessRecord {
    pub input_digests: BTreeMap<ArtifactId, Digest>,
    pub output_digests: BTreeMap<ArtifactId, Digest>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Observed digest of one artifact; `None` when absent
pub type Observation = (ArtifactId, Option<Digest>);

impl StalenessRecord {
    /// Create a record from current observations
    ///
    /// Absent artifacts are left out; they can never match on comparison.
    pub fn new(inputs: &[Observation], outputs: &[Observation], duration_ms: u64) -> Self {
        let present = |obs: &[Observation]| {
            obs.iter()
                .filter_map(|(id, d)| d.map(|d| (id.clone(), d)))
                .collect()
        };
        Self {
            input_digests: present(inputs),
            output_digests: present(outputs),
            recorded_at: Utc::now(),
            duration_ms,
        }
    }
}

/// Why a transformation must run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Never ran successfully, or the record was forgotten
    NoRecord,
    /// An input has no digest (missing, phony or unset virtual)
    InputAbsent(ArtifactId),
    /// An input digest differs from the recorded one
    InputChanged(ArtifactId),
    /// The input set differs from the recorded one
    InputsChanged,
    /// An output does not exist
    OutputMissing(ArtifactId),
    /// An output was modified since the last run
    OutputChanged(ArtifactId),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecord => write!(f, "no previous run recorded"),
            Self::InputAbsent(id) => write!(f, "input {} has no digest", id),
            Self::InputChanged(id) => write!(f, "input {} changed", id),
            Self::InputsChanged => write!(f, "input set changed"),
            Self::OutputMissing(id) => write!(f, "output {} is missing", id),
            Self::OutputChanged(id) => write!(f, "output {} changed", id),
        }
    }
}

/// Compare current observations against a record
///
/// Returns `None` when the transformation is fresh.
pub fn evaluate(
    record: Option<&StalenessRecord>,
    inputs: &[Observation],
    outputs: &[Observation],
) -> Option<StaleReason> {
    let Some(record) = record else {
        return Some(StaleReason::NoRecord);
    };

    for (id, digest) in inputs {
        let Some(digest) = digest else {
            return Some(StaleReason::InputAbsent(id.clone()));
        };
        match record.input_digests.get(id) {
            Some(recorded) if recorded == digest => {}
            Some(_) => return Some(StaleReason::InputChanged(id.clone())),
            None => return Some(StaleReason::InputsChanged),
        }
    }
    let distinct_inputs = inputs
        .iter()
        .map(|(id, _)| id)
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    if distinct_inputs != record.input_digests.len() {
        return Some(StaleReason::InputsChanged);
    }

    for (id, digest) in outputs {
        let Some(digest) = digest else {
            return Some(StaleReason::OutputMissing(id.clone()));
        };
        if record.output_digests.get(id) != Some(digest) {
            return Some(StaleReason::OutputChanged(id.clone()));
        }
    }
    None
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    records: BTreeMap<TransformId, StalenessRecord>,
}

/// Persistent mapping from transformation identity to staleness record
#[derive(Debug)]
pub struct StalenessStore {
    path: PathBuf,
    records: RwLock<BTreeMap<TransformId, StalenessRecord>>,
    writer: Mutex<()>,
}

impl StalenessStore {
    /// Create an empty store that will persist to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_records(path.into(), BTreeMap::new())
    }

    fn with_records(path: PathBuf, records: BTreeMap<TransformId, StalenessRecord>) -> Self {
        Self {
            path,
            records: RwLock::new(records),
            writer: Mutex::new(()),
        }
    }

    /// Load the store, failing on unreadable or incompatible content
    ///
    /// A missing file yields an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> BeaverResult<Self> {
        let path = path.into();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(e) => return Err(persistence(&path, e)),
        };

        let file: StoreFile = serde_json::from_str(&content).map_err(|e| persistence(&path, e))?;
        if file.version != STORE_VERSION {
            return Err(persistence(
                &path,
                format!(
                    "unsupported version {} (expected {})",
                    file.version, STORE_VERSION
                ),
            ));
        }

        debug!("Loaded {} staleness records from {}", file.records.len(), path.display());
        Ok(Self::with_records(path, file.records))
    }

    /// Load the store, degrading to an empty one when it is unusable
    ///
    /// An empty store makes every transformation stale, which is always safe.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path).await {
            Ok(store) => store,
            Err(e) => {
                warn!("{}; rebuilding everything", e);
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the record for a transformation
    pub fn query(&self, id: &TransformId) -> Option<StalenessRecord> {
        self.read().get(id).cloned()
    }

    /// Replace the record for a transformation in memory
    pub fn record(&self, id: TransformId, record: StalenessRecord) {
        self.write().insert(id, record);
    }

    /// Record and persist in one step
    pub async fn commit(&self, id: TransformId, record: StalenessRecord) -> BeaverResult<()> {
        self.record(id, record);
        self.flush().await
    }

    /// Drop the records of the given transformations, returning how many existed
    pub fn forget<'a>(&self, ids: impl IntoIterator<Item = &'a TransformId>) -> usize {
        let mut records = self.write();
        ids.into_iter()
            .filter(|id| records.remove(*id).is_some())
            .count()
    }

    /// Drop every record
    pub fn clear(&self) -> usize {
        let mut records = self.write();
        let count = records.len();
        records.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Identities of all recorded transformations
    pub fn ids(&self) -> Vec<TransformId> {
        self.read().keys().cloned().collect()
    }

    /// Write the current records to disk atomically
    pub async fn flush(&self) -> BeaverResult<()> {
        let _guard = self.writer.lock().await;

        let content = {
            let file = StoreFile {
                version: STORE_VERSION,
                records: self.read().clone(),
            };
            serde_json::to_string_pretty(&file)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| persistence(&self.path, e))?;
            }
        }

        let tmp = temp_path(&self.path);
        fs::write(&tmp, content)
            .await
            .map_err(|e| persistence(&self.path, e))?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(persistence(&self.path, e));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<TransformId, StalenessRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<TransformId, StalenessRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn persistence(path: &Path, reason: impl ToString) -> BeaverError {
    BeaverError::Persistence {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn obs(name: &str, content: Option<&str>) -> Observation {
        (
            ArtifactId::new(name),
            content.map(|c| Digest::of_bytes(c.as_bytes())),
        )
    }

    fn tid(name: &str) -> TransformId {
        TransformId::from_outputs([&ArtifactId::new(name)])
    }

    #[test]
    fn staleness_rules() {
        let inputs = [obs("a", Some("x"))];
        let outputs = [obs("b", Some("x"))];
        let record = StalenessRecord::new(&inputs, &outputs, 5);

        assert_eq!(evaluate(None, &inputs, &outputs), Some(StaleReason::NoRecord));
        assert_eq!(evaluate(Some(&record), &inputs, &outputs), None);
        assert_eq!(
            evaluate(Some(&record), &[obs("a", Some("y"))], &outputs),
            Some(StaleReason::InputChanged(ArtifactId::new("a")))
        );
        assert_eq!(
            evaluate(Some(&record), &inputs, &[obs("b", None)]),
            Some(StaleReason::OutputMissing(ArtifactId::new("b")))
        );
        assert_eq!(
            evaluate(Some(&record), &inputs, &[obs("b", Some("tampered"))]),
            Some(StaleReason::OutputChanged(ArtifactId::new("b")))
        );
    }

    #[test]
    fn input_set_changes_are_stale() {
        let outputs = [obs("out", Some("o"))];
        let record = StalenessRecord::new(&[obs("a", Some("1")), obs("b", Some("2"))], &outputs, 0);

        assert_eq!(
            evaluate(Some(&record), &[obs("a", Some("1"))], &outputs),
            Some(StaleReason::InputsChanged)
        );
        assert_eq!(
            evaluate(
                Some(&record),
                &[obs("a", Some("1")), obs("b", Some("2")), obs("c", Some("3"))],
                &outputs
            ),
            Some(StaleReason::InputsChanged)
        );
    }

    #[test]
    fn absent_inputs_are_stale() {
        let record = StalenessRecord::new(&[], &[obs("out", Some("o"))], 0);
        assert_eq!(
            evaluate(Some(&record), &[obs("phony", None)], &[obs("out", Some("o"))]),
            Some(StaleReason::InputAbsent(ArtifactId::new("phony")))
        );
    }

    #[tokio::test]
    async fn commit_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_DIGEST_FILE);

        let store = StalenessStore::load(&path).await.unwrap();
        assert!(store.is_empty());
        let record = StalenessRecord::new(&[obs("a", Some("x"))], &[obs("b", Some("x"))], 12);
        store.commit(tid("b"), record.clone()).await.unwrap();

        let reloaded = StalenessStore::load(&path).await.unwrap();
        assert_eq!(reloaded.query(&tid("b")), Some(record));
        assert!(reloaded.query(&tid("c")).is_none());

        // No temporary files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_store_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_DIGEST_FILE);
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            StalenessStore::load(&path).await,
            Err(BeaverError::Persistence { .. })
        ));
        assert!(StalenessStore::open(&path).await.is_empty());
    }

    #[tokio::test]
    async fn version_mismatch_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_DIGEST_FILE);
        std::fs::write(&path, r#"{"version": 99, "records": {}}"#).unwrap();

        let err = StalenessStore::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("unsupported version 99"));
    }

    #[tokio::test]
    async fn forget_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = StalenessStore::empty(dir.path().join("digests"));
        let record = StalenessRecord::new(&[], &[obs("b", Some("x"))], 0);
        store.record(tid("b"), record.clone());
        store.record(tid("c"), record);

        assert_eq!(store.forget([&tid("b"), &tid("missing")]), 1);
        assert_eq!(store.ids(), vec![tid("c")]);
        assert_eq!(store.clear(), 1);
        assert!(store.is_empty());
    }
}
