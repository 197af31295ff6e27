//! Progress state persistence
//!
//! The progress file records every finished outlet of a run together with a
//! fingerprint of the inputs that produced it. It is rewritten atomically
//! (temp file, fsync, rename) after each completion, so a crash leaves
//! either the previous or the new version on disk, never a torn one.

use crate::{Outlet, OutletFacilityResult};
use chrono::Utc;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current progress schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size (256 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// How an existing progress file is treated at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Continue from the file when its fingerprint matches
    #[default]
    On,
    /// Ignore the file; it is overwritten by the first checkpoint
    Off,
    /// Delete the file before starting
    Reset,
}

/// What happened to the progress file when the run started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// No usable prior state; starting fresh
    Fresh,
    /// Continuing a previous run
    Resumed {
        /// Outlets already finished
        completed: usize,
    },
    /// Prior state belonged to different inputs or configuration
    FingerprintChanged,
    /// Prior state was unreadable and was moved out of the way
    MovedAside {
        /// Where the old file now lives
        to: PathBuf,
    },
    /// Prior state was deleted on request
    Reset,
}

/// Progress of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    schema_version: String,
    run_fingerprint: String,
    completed_outlet_ids: BTreeSet<String>,
    results: BTreeMap<String, OutletFacilityResult>,
    created_at: i64,
    last_checkpoint_at: i64,
}

impl ProgressState {
    /// Create an empty state for a run fingerprint
    pub fn new(run_fingerprint: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            run_fingerprint: run_fingerprint.into(),
            completed_outlet_ids: BTreeSet::new(),
            results: BTreeMap::new(),
            created_at: now,
            last_checkpoint_at: now,
        }
    }

    /// Fingerprint of the inputs this state belongs to
    pub fn fingerprint(&self) -> &str {
        &self.run_fingerprint
    }

    /// Schema version
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Whether an outlet already has a terminal result
    pub fn is_completed(&self, outlet_id: &str) -> bool {
        self.completed_outlet_ids.contains(outlet_id)
    }

    /// Number of finished outlets
    pub fn completed_count(&self) -> usize {
        self.completed_outlet_ids.len()
    }

    /// Finished outlet ids
    pub fn completed_ids(&self) -> &BTreeSet<String> {
        &self.completed_outlet_ids
    }

    /// All results keyed by outlet id
    pub fn results(&self) -> &BTreeMap<String, OutletFacilityResult> {
        &self.results
    }

    /// Result of one outlet
    pub fn result(&self, outlet_id: &str) -> Option<&OutletFacilityResult> {
        self.results.get(outlet_id)
    }

    /// Creation time (Unix millis)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Time of the latest recorded result (Unix millis)
    pub fn last_checkpoint_at(&self) -> i64 {
        self.last_checkpoint_at
    }

    /// Record a terminal result
    ///
    /// Results are written once: returns `false` and keeps the existing
    /// result when the outlet is already complete.
    pub fn record(&mut self, result: OutletFacilityResult) -> bool {
        if self.completed_outlet_ids.contains(&result.outlet_id) {
            warn!(outlet_id = %result.outlet_id, "Outlet already recorded, keeping first result");
            return false;
        }
        self.completed_outlet_ids.insert(result.outlet_id.clone());
        self.results.insert(result.outlet_id.clone(), result);
        self.last_checkpoint_at = Utc::now().timestamp_millis();
        true
    }

    /// Check internal consistency after loading
    pub fn validate(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        let ids_match = self.completed_outlet_ids.len() == self.results.len()
            && self
                .results
                .iter()
                .all(|(id, result)| self.completed_outlet_ids.contains(id) && result.outlet_id == *id);
        if !ids_match {
            return Err(ResumeError::DeserializationError(
                "completed ids and results disagree".to_string(),
            ));
        }
        Ok(())
    }

    /// Save state to file with atomic writes and file locking
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(
            path = %path.display(),
            completed = self.completed_outlet_ids.len(),
            "Saving progress state"
        );

        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;

        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Make the rename durable
        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        crate::metrics::record_checkpoint();
        debug!(
            path = %path.display(),
            completed = self.completed_outlet_ids.len(),
            "Progress state saved"
        );
        Ok(())
    }

    /// Load state from file with locking
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        debug!(path = %path.display(), "Loading progress state");

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let state: ProgressState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize progress state");
            ResumeError::DeserializationError(e.to_string())
        })?;
        state.validate()?;

        info!(
            path = %path.display(),
            completed = state.completed_outlet_ids.len(),
            "Progress state loaded"
        );
        Ok(state)
    }

    /// Load prior progress according to `mode`, degrading to a fresh state
    ///
    /// Only a failed reset is an error; unreadable or foreign files never
    /// stop a run.
    pub fn load_or_fresh(
        path: &Path,
        run_fingerprint: &str,
        mode: ResumeMode,
    ) -> Result<(Self, ResumeOutcome), ResumeError> {
        let fresh = || Self::new(run_fingerprint);

        match mode {
            ResumeMode::Off => {
                info!(path = %path.display(), "Resume disabled, starting fresh");
                return Ok((fresh(), ResumeOutcome::Fresh));
            }
            ResumeMode::Reset => {
                if path.exists() {
                    std::fs::remove_file(path).map_err(|e| {
                        ResumeError::IoError(format!("Failed to remove {}: {e}", path.display()))
                    })?;
                    info!(path = %path.display(), "Progress file removed");
                    return Ok((fresh(), ResumeOutcome::Reset));
                }
                return Ok((fresh(), ResumeOutcome::Fresh));
            }
            ResumeMode::On => {}
        }

        if !path.exists() {
            return Ok((fresh(), ResumeOutcome::Fresh));
        }

        match Self::load(path) {
            Ok(state) if state.run_fingerprint == run_fingerprint => {
                let completed = state.completed_count();
                info!(completed, "Resuming previous run");
                Ok((state, ResumeOutcome::Resumed { completed }))
            }
            Ok(state) => {
                warn!(
                    previous = %state.run_fingerprint,
                    current = %run_fingerprint,
                    "Inputs or configuration changed since the last run, starting fresh"
                );
                Ok((fresh(), ResumeOutcome::FingerprintChanged))
            }
            Err(e @ ResumeError::IoError(_)) | Err(e @ ResumeError::LockError(_)) => {
                warn!(path = %path.display(), error = %e, "Progress file unreadable, starting fresh");
                Ok((fresh(), ResumeOutcome::Fresh))
            }
            Err(e) => {
                let to = corrupt_path(path);
                warn!(
                    path = %path.display(),
                    moved_to = %to.display(),
                    error = %e,
                    "Progress file invalid, moving it aside"
                );
                match std::fs::rename(path, &to) {
                    Ok(()) => Ok((fresh(), ResumeOutcome::MovedAside { to })),
                    Err(rename_err) => {
                        warn!(error = %rename_err, "Could not move progress file aside");
                        Ok((fresh(), ResumeOutcome::Fresh))
                    }
                }
            }
        }
    }
}

/// `<name>.corrupt-<timestamp>` next to the original
fn corrupt_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "progress".to_string());
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    path.with_file_name(format!("{name}.corrupt-{stamp}"))
}

/// Fingerprint of a run's inputs
///
/// Covers the outlet list (ids and coordinates, in order) and the
/// configuration that affects results, so progress is never resumed against
/// different inputs.
pub fn compute_fingerprint(outlets: &[Outlet], config_material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config_material.as_bytes());
    for outlet in outlets {
        hasher.update(b"\n");
        hasher.update(outlet.id.as_bytes());
        hasher.update(format!("|{:.6}|{:.6}", outlet.latitude, outlet.longitude).as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Errors related to progress state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
