// Checkpointing - Persist and reload the phase document
use super::state::PhaseRecord;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Checkpointer - Saves and loads the single state document
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, or defaults if the file is absent or unreadable.
    pub fn load(&self) -> PhaseRecord {
        match self.try_load() {
            Ok(Some(record)) => record,
            Ok(None) => PhaseRecord::default(),
            Err(e) => {
                warn!("⚠️ {}; starting from an empty state", e);
                PhaseRecord::default()
            }
        }
    }

    /// Strict load: `None` when the file does not exist, `CorruptState`
    /// when it cannot be parsed.
    pub fn try_load(&self) -> PipelineResult<Option<PhaseRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| PipelineError::CorruptState {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| PipelineError::CorruptState {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Save the whole document, stamping `last_updated`.
    ///
    /// Written to a sibling temp file first and renamed over the target.
    pub fn save(&self, record: &mut PhaseRecord) -> PipelineResult<()> {
        record.last_updated = Some(Local::now());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        info!(
            "💾 State saved: {} ({})",
            record.project_id.as_deref().unwrap_or("-"),
            record.current_phase
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::Phase;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        assert!(file.try_load().unwrap().is_none());
        assert_eq!(file.load(), PhaseRecord::default());
    }

    #[test]
    fn test_corrupt_file_resets_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let file = StateFile::new(&path);
        assert!(matches!(file.try_load(), Err(PipelineError::CorruptState { .. })));
        assert_eq!(file.load().current_phase, Phase::Idle);
    }

    #[test]
    fn test_save_stamps_and_round_trips() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested").join("state.json"));
        let mut record = PhaseRecord {
            project_id: Some("P1".into()),
            current_phase: Phase::ScriptApproved,
            ..Default::default()
        };
        file.save(&mut record).unwrap();
        assert!(record.last_updated.is_some());
        let loaded = file.load();
        assert_eq!(loaded.project_id.as_deref(), Some("P1"));
        assert_eq!(loaded.current_phase, Phase::ScriptApproved);
    }
}
