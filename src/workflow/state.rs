// PhaseRecord - The persisted "where is this project" document
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::scene_id::SceneId;
use crate::types::ProjectSettings;

/// Coarse-grained pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Initialized,
    ScriptApproved,
    ScenesApproved,
    TtsCompleted,
    /// Batch synthesis stopped on quota; resume from `resume_cursor`.
    TtsPartial,
    ManimCoding,
    ManimCompleted,
    Rendering,
    Rendered,
    Completed,
    /// Anything written by a newer or older tool we do not recognise.
    #[serde(other)]
    Unknown,
}

impl Phase {
    /// Phases in which narration may be (re)synthesized.
    pub fn allows_narration(&self) -> bool {
        matches!(
            self,
            Phase::ScenesApproved
                | Phase::TtsCompleted
                | Phase::TtsPartial
                | Phase::ManimCoding
                | Phase::ManimCompleted
                | Phase::Rendering
                | Phase::Rendered
                | Phase::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Initialized => "initialized",
            Phase::ScriptApproved => "script_approved",
            Phase::ScenesApproved => "scenes_approved",
            Phase::TtsCompleted => "tts_completed",
            Phase::TtsPartial => "tts_partial",
            Phase::ManimCoding => "manim_coding",
            Phase::ManimCompleted => "manim_completed",
            Phase::Rendering => "rendering",
            Phase::Rendered => "rendered",
            Phase::Completed => "completed",
            Phase::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneRoster {
    pub total: usize,
    pub pending: Vec<SceneId>,
    pub completed: Vec<SceneId>,
    pub current: Option<SceneId>,
}

impl SceneRoster {
    pub fn from_ids(ids: &[SceneId]) -> Self {
        Self {
            total: ids.len(),
            pending: ids.to_vec(),
            completed: Vec::new(),
            current: ids.first().cloned(),
        }
    }

    pub fn contains(&self, scene: &SceneId) -> bool {
        self.pending.contains(scene) || self.completed.contains(scene)
    }

    /// Move `scene` from pending to completed. Returns false if it was
    /// already completed or is not on the roster.
    pub fn complete(&mut self, scene: &SceneId) -> bool {
        if !self.pending.contains(scene) {
            return false;
        }
        self.pending.retain(|id| id != scene);
        self.completed.push(scene.clone());
        self.current = self.pending.first().cloned();
        true
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.completed.len(), self.total)
    }
}

/// Artifact categories tracked in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    Script,
    Scenes,
    Audio,
    AnimationSource,
    Subtitles,
    Renders,
    Final,
}

/// Append-only, de-duplicated artifact paths per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRegistry {
    pub script: Vec<PathBuf>,
    pub scenes: Vec<PathBuf>,
    pub audio: Vec<PathBuf>,
    pub animation_source: Vec<PathBuf>,
    pub subtitles: Vec<PathBuf>,
    pub renders: Vec<PathBuf>,
    #[serde(rename = "final")]
    pub final_video: Vec<PathBuf>,
}

impl FileRegistry {
    fn slot(&mut self, category: ArtifactCategory) -> &mut Vec<PathBuf> {
        match category {
            ArtifactCategory::Script => &mut self.script,
            ArtifactCategory::Scenes => &mut self.scenes,
            ArtifactCategory::Audio => &mut self.audio,
            ArtifactCategory::AnimationSource => &mut self.animation_source,
            ArtifactCategory::Subtitles => &mut self.subtitles,
            ArtifactCategory::Renders => &mut self.renders,
            ArtifactCategory::Final => &mut self.final_video,
        }
    }

    pub fn register(&mut self, category: ArtifactCategory, path: &Path) -> bool {
        let slot = self.slot(category);
        if slot.iter().any(|p| p == path) {
            return false;
        }
        slot.push(path.to_path_buf());
        true
    }

    pub fn register_all<'a, I>(&mut self, category: ArtifactCategory, paths: I)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        for path in paths {
            self.register(category, path);
        }
    }

    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("script", self.script.len()),
            ("scenes", self.scenes.len()),
            ("audio", self.audio.len()),
            ("animation_source", self.animation_source.len()),
            ("subtitles", self.subtitles.len()),
            ("renders", self.renders.len()),
            ("final", self.final_video.len()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseRecord {
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub settings: ProjectSettings,
    pub current_phase: Phase,
    pub scene_roster: SceneRoster,
    pub file_registry: FileRegistry,
    /// 1-based index of the first scene not yet synthesized.
    pub resume_cursor: Option<usize>,
    pub last_updated: Option<DateTime<Local>>,
}

impl PhaseRecord {
    pub fn has_project(&self) -> bool {
        self.project_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_phase_deserializes() {
        let phase: Phase = serde_json::from_str("\"video_uploaded\"").unwrap();
        assert_eq!(phase, Phase::Unknown);
        let phase: Phase = serde_json::from_str("\"tts_partial\"").unwrap();
        assert_eq!(phase, Phase::TtsPartial);
    }

    #[test]
    fn test_fresh_record_starts_idle() {
        assert_eq!(Phase::default(), Phase::Idle);
        assert_eq!(PhaseRecord::default().current_phase, Phase::Idle);
    }

    #[test]
    fn test_registry_dedupes() {
        let mut registry = FileRegistry::default();
        let path = PathBuf::from("output/P1/0_audio/s1_audio.mp3");
        assert!(registry.register(ArtifactCategory::Audio, &path));
        assert!(!registry.register(ArtifactCategory::Audio, &path));
        assert_eq!(registry.audio.len(), 1);
    }

    #[test]
    fn test_roster_complete_is_monotonic() {
        let ids = vec![SceneId::from("s1"), SceneId::from("s2")];
        let mut roster = SceneRoster::from_ids(&ids);
        assert!(roster.complete(&ids[0]));
        assert!(!roster.complete(&ids[0]));
        assert!(!roster.complete(&SceneId::from("s9")));
        assert_eq!(roster.completed, vec![ids[0].clone()]);
        assert_eq!(roster.current, Some(ids[1].clone()));
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let record: PhaseRecord =
            serde_json::from_str(r#"{"project_id":"P1","current_phase":"initialized"}"#).unwrap();
        assert_eq!(record.current_phase, Phase::Initialized);
        assert_eq!(record.settings.duration, 480);
        assert!(record.scene_roster.pending.is_empty());
    }
}
