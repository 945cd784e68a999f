// PhaseStateMachine - single source of truth for project progress
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::checkpoint::StateFile;
use super::state::{ArtifactCategory, Phase, PhaseRecord, SceneRoster};
use crate::error::{PipelineError, PipelineResult};
use crate::scene_id::SceneId;
use crate::store::{new_project_id, ArtifactStore};
use crate::types::ProjectSettings;
use crate::CLI_NAME;

/// Serialized access for concurrent batch workers.
pub type SharedPhaseMachine = Arc<Mutex<PhaseStateMachine>>;

/// Human-actionable next step derived from the current phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    pub phase: Phase,
    pub message: String,
    /// CLI arguments (without the binary name) that perform the next step.
    pub command: Option<String>,
    /// 1-based scene index to resume synthesis from.
    pub scene_index: Option<usize>,
    pub scene: Option<SceneId>,
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)?;
        if let Some(command) = &self.command {
            write!(f, "\n  → {} {}", CLI_NAME, command)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub record: PhaseRecord,
    pub resume: ResumePoint,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.record;
        writeln!(f, "Project:  {}", r.project_id.as_deref().unwrap_or("(none)"))?;
        writeln!(f, "Title:    {}", r.title.as_deref().unwrap_or("-"))?;
        writeln!(f, "Phase:    {}", r.current_phase)?;
        writeln!(
            f,
            "Settings: style={} difficulty={} duration={}s aspect={:?} voice={}",
            r.settings.style,
            r.settings.difficulty,
            r.settings.duration,
            r.settings.aspect_ratio,
            r.settings.voice
        )?;
        let (done, total) = r.scene_roster.progress();
        writeln!(f, "Scenes:   {}/{} coded", done, total)?;
        if let Some(current) = &r.scene_roster.current {
            writeln!(f, "Current:  {}", current)?;
        }
        let counts: Vec<String> = r
            .file_registry
            .counts()
            .into_iter()
            .map(|(name, n)| format!("{}={}", name, n))
            .collect();
        writeln!(f, "Files:    {}", counts.join(" "))?;
        if let Some(updated) = r.last_updated {
            writeln!(f, "Updated:  {}", updated.format("%Y-%m-%d %H:%M:%S"))?;
        }
        write!(f, "Next:     {}", self.resume)
    }
}

pub struct PhaseStateMachine {
    file: StateFile,
    output_root: PathBuf,
    cached: Option<PhaseRecord>,
}

impl PhaseStateMachine {
    pub fn new(state_path: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            file: StateFile::new(state_path),
            output_root: output_root.into(),
            cached: None,
        }
    }

    pub fn shared(self) -> SharedPhaseMachine {
        Arc::new(Mutex::new(self))
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Current record, loaded on first access.
    pub fn record(&mut self) -> &PhaseRecord {
        self.record_mut()
    }

    fn record_mut(&mut self) -> &mut PhaseRecord {
        let file = &self.file;
        self.cached.get_or_insert_with(|| file.load())
    }

    /// Drop the cache and re-read the document (picks up external edits).
    pub fn reload(&mut self) -> &PhaseRecord {
        self.cached = None;
        self.record_mut()
    }

    fn persist(&mut self) -> PipelineResult<PhaseRecord> {
        let file = self.file.clone();
        let record = self.record_mut();
        file.save(record)?;
        Ok(record.clone())
    }

    fn active_project(&mut self) -> PipelineResult<String> {
        self.record()
            .project_id
            .clone()
            .ok_or(PipelineError::NoActiveProject)
    }

    fn ensure_project(&mut self, project_id: &str) -> PipelineResult<()> {
        let active = self.active_project()?;
        if active != project_id {
            return Err(PipelineError::ProjectMismatch {
                active,
                requested: project_id.to_string(),
            });
        }
        Ok(())
    }

    /// Narration needs an approved, non-empty scene roster.
    pub fn ensure_narration_ready(&mut self) -> PipelineResult<()> {
        self.active_project()?;
        let record = self.record();
        if record.scene_roster.total == 0 {
            return Err(PipelineError::InvalidInput(
                "no approved scenes, run `approve-scenes` first".into(),
            ));
        }
        if !record.current_phase.allows_narration() {
            return Err(PipelineError::InvalidInput(format!(
                "narration cannot run in phase {}",
                record.current_phase
            )));
        }
        Ok(())
    }

    /// Artifact tree for the active project.
    pub fn store(&mut self) -> PipelineResult<ArtifactStore> {
        let project_id = self.active_project()?;
        Ok(ArtifactStore::new(&self.output_root, &project_id))
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    pub fn initialize(
        &mut self,
        title: &str,
        settings: ProjectSettings,
    ) -> PipelineResult<PhaseRecord> {
        let project_id = new_project_id();
        ArtifactStore::new(&self.output_root, &project_id).create_layout()?;

        let record = self.record_mut();
        *record = PhaseRecord {
            project_id: Some(project_id.clone()),
            title: Some(title.to_string()),
            settings,
            current_phase: Phase::Initialized,
            ..Default::default()
        };
        info!("🎬 Project initialized: {} ({})", project_id, title);
        self.persist()
    }

    pub fn approve_script(&mut self, project_id: &str) -> PipelineResult<PhaseRecord> {
        self.ensure_project(project_id)?;
        let store = self.store()?;
        let record = self.record_mut();
        for path in [store.script_path(), store.tts_script_path()] {
            if path.is_file() {
                record.file_registry.register(ArtifactCategory::Script, &path);
            }
        }
        record.current_phase = Phase::ScriptApproved;
        info!("📜 Script approved for {}", project_id);
        self.persist()
    }

    pub fn approve_scenes(
        &mut self,
        project_id: &str,
        scene_ids: &[SceneId],
    ) -> PipelineResult<PhaseRecord> {
        if scene_ids.is_empty() {
            return Err(PipelineError::InvalidInput(
                "approve_scenes needs at least one scene id".into(),
            ));
        }
        self.ensure_project(project_id)?;
        let store = self.store()?;
        let record = self.record_mut();
        record.scene_roster = SceneRoster::from_ids(scene_ids);
        record.resume_cursor = None;
        let scenes_path = store.scenes_path();
        if scenes_path.is_file() {
            record.file_registry.register(ArtifactCategory::Scenes, &scenes_path);
        }
        record.current_phase = Phase::ScenesApproved;
        info!("🎞️ {} scene(s) approved for {}", scene_ids.len(), project_id);
        self.persist()
    }

    pub fn complete_tts(
        &mut self,
        project_id: &str,
        audio_paths: &[PathBuf],
    ) -> PipelineResult<PhaseRecord> {
        self.ensure_project(project_id)?;
        self.ensure_narration_ready()?;
        let record = self.record_mut();
        record.file_registry.register_all(ArtifactCategory::Audio, audio_paths);
        record.resume_cursor = None;
        record.current_phase = Phase::TtsCompleted;
        info!("🔊 Narration audio complete ({} file(s))", audio_paths.len());
        self.persist()
    }

    pub fn partial_tts(
        &mut self,
        project_id: &str,
        audio_paths: &[PathBuf],
        resume_from_index: usize,
    ) -> PipelineResult<PhaseRecord> {
        self.ensure_project(project_id)?;
        self.ensure_narration_ready()?;
        let record = self.record_mut();
        record.file_registry.register_all(ArtifactCategory::Audio, audio_paths);
        record.resume_cursor = Some(resume_from_index.max(1));
        record.current_phase = Phase::TtsPartial;
        info!("⏸️ Narration audio stopped, resume from scene #{}", resume_from_index);
        self.persist()
    }

    /// Mark one scene's animation source as done. Re-marking is a no-op.
    pub fn complete_scene_code(
        &mut self,
        scene_id: &SceneId,
        artifact_path: &Path,
    ) -> PipelineResult<PhaseRecord> {
        self.active_project()?;
        let record = self.record_mut();
        if !record.scene_roster.contains(scene_id) {
            return Err(PipelineError::InvalidInput(format!(
                "{} is not an approved scene",
                scene_id
            )));
        }
        if !record.scene_roster.complete(scene_id) {
            return Ok(record.clone());
        }
        record
            .file_registry
            .register(ArtifactCategory::AnimationSource, artifact_path);
        record.current_phase = if record.scene_roster.pending.is_empty() {
            Phase::ManimCompleted
        } else {
            Phase::ManimCoding
        };
        let (done, total) = record.scene_roster.progress();
        info!("✍️ Scene {} coded ({}/{})", scene_id, done, total);
        self.persist()
    }

    pub fn start_rendering(&mut self) -> PipelineResult<PhaseRecord> {
        self.active_project()?;
        self.record_mut().current_phase = Phase::Rendering;
        self.persist()
    }

    pub fn mark_rendered(&mut self, render_paths: &[PathBuf]) -> PipelineResult<PhaseRecord> {
        self.active_project()?;
        let record = self.record_mut();
        record.file_registry.register_all(ArtifactCategory::Renders, render_paths);
        record.current_phase = Phase::Rendered;
        self.persist()
    }

    pub fn complete(&mut self, final_artifact_path: &Path) -> PipelineResult<PhaseRecord> {
        self.active_project()?;
        let record = self.record_mut();
        record
            .file_registry
            .register(ArtifactCategory::Final, final_artifact_path);
        record.current_phase = Phase::Completed;
        info!("🏁 Project complete: {}", final_artifact_path.display());
        self.persist()
    }

    /// Record one produced artifact without changing phase.
    pub fn register_artifact(
        &mut self,
        category: ArtifactCategory,
        path: &Path,
    ) -> PipelineResult<PhaseRecord> {
        self.active_project()?;
        if !self.record_mut().file_registry.register(category, path) {
            return Ok(self.record().clone());
        }
        self.persist()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn resume_point(&mut self) -> ResumePoint {
        resume_point_for(self.record())
    }

    pub fn status(&mut self) -> StatusReport {
        let record = self.record().clone();
        let resume = resume_point_for(&record);
        StatusReport { record, resume }
    }
}

/// Map a record to its next step. Never fails.
pub fn resume_point_for(record: &PhaseRecord) -> ResumePoint {
    let phase = record.current_phase;
    let roster = &record.scene_roster;
    let mut point = ResumePoint {
        phase,
        message: String::new(),
        command: None,
        scene_index: None,
        scene: None,
    };

    match phase {
        Phase::Idle => {
            point.message = "No project yet. Start one.".into();
            point.command = Some("init --title \"<title>\"".into());
        }
        Phase::Initialized => {
            point.message = "Write the reading script, then approve it.".into();
            point.command = Some("approve-script".into());
        }
        Phase::ScriptApproved => {
            point.message = "Break the script into scenes, then approve them.".into();
            point.command = Some("approve-scenes".into());
        }
        Phase::ScenesApproved => {
            point.message = format!("Generate narration audio for {} scene(s).", roster.total);
            point.command = Some("tts-all".into());
            point.scene_index = Some(1);
        }
        Phase::TtsPartial => {
            let index = record.resume_cursor.unwrap_or(1);
            point.message = format!(
                "Narration audio stopped early. Resume at scene #{} of {}.",
                index, roster.total
            );
            point.command = Some(format!("tts-all --from {}", index));
            point.scene_index = Some(index);
        }
        Phase::TtsCompleted | Phase::ManimCoding => match &roster.current {
            Some(current) => {
                let (done, total) = roster.progress();
                point.message = format!(
                    "Write animation code for {} ({}/{} done).",
                    current, done, total
                );
                point.command = Some(format!("scene-done --scene {} --file <path>", current));
                point.scene = Some(current.clone());
            }
            None => {
                point.message = "All animation code written. Render the scenes.".into();
                point.command = Some("render-all".into());
            }
        },
        Phase::ManimCompleted => {
            point.message = "All animation code written. Render the scenes.".into();
            point.command = Some("render-all".into());
        }
        Phase::Rendering => {
            point.message = "Rendering in progress or interrupted. Re-run the render batch.".into();
            point.command = Some("render-all".into());
        }
        Phase::Rendered => {
            point.message = "All scenes rendered. Compose scenes and the final video.".into();
            point.command = Some("compose-all".into());
        }
        Phase::Completed => {
            let final_path = record
                .file_registry
                .final_video
                .last()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "final_video.mp4".into());
            point.message = format!("Project complete: {}", final_path);
        }
        Phase::Unknown => {
            point.message = "Unrecognised phase in the state file. Check the project status.".into();
            point.command = Some("status".into());
        }
    }
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn machine() -> (TempDir, PhaseStateMachine, String) {
        let dir = tempdir().unwrap();
        let mut machine =
            PhaseStateMachine::new(dir.path().join("state.json"), dir.path().join("output"));
        let record = machine.initialize("Limits", ProjectSettings::default()).unwrap();
        let pid = record.project_id.unwrap();
        (dir, machine, pid)
    }

    fn ids(raw: &[&str]) -> Vec<SceneId> {
        raw.iter().map(|s| SceneId::from(*s)).collect()
    }

    #[test]
    fn test_initialize_creates_tree_and_persists() {
        let (dir, mut machine, pid) = machine();
        assert!(pid.starts_with('P'));
        assert!(dir.path().join("output").join(&pid).join("0_audio").is_dir());

        let mut fresh = PhaseStateMachine::new(dir.path().join("state.json"), dir.path().join("output"));
        assert_eq!(fresh.record().current_phase, Phase::Initialized);
        assert_eq!(machine.record().title.as_deref(), Some("Limits"));
    }

    #[test]
    fn test_operations_without_project_fail() {
        let dir = tempdir().unwrap();
        let mut machine = PhaseStateMachine::new(dir.path().join("state.json"), dir.path());
        assert!(matches!(machine.approve_script("P1"), Err(PipelineError::NoActiveProject)));
        assert_eq!(machine.resume_point().phase, Phase::Idle);
    }

    #[test]
    fn test_project_mismatch_is_rejected() {
        let (_dir, mut machine, _pid) = machine();
        let err = machine.approve_script("P19990101_000000").unwrap_err();
        assert!(matches!(err, PipelineError::ProjectMismatch { .. }));
    }

    #[test]
    fn test_approve_scenes_resets_roster_and_points_at_tts() {
        let (_dir, mut machine, pid) = machine();
        machine.approve_script(&pid).unwrap();
        let record = machine.approve_scenes(&pid, &ids(&["s1", "s2", "s3"])).unwrap();
        assert_eq!(record.scene_roster.total, 3);
        assert_eq!(record.scene_roster.current, Some(SceneId::from("s1")));
        assert!(record.scene_roster.completed.is_empty());

        let resume = machine.resume_point();
        assert_eq!(resume.phase, Phase::ScenesApproved);
        assert_eq!(resume.command.as_deref(), Some("tts-all"));
        assert_eq!(resume.scene_index, Some(1));
    }

    #[test]
    fn test_empty_scene_list_is_rejected() {
        let (_dir, mut machine, pid) = machine();
        assert!(matches!(
            machine.approve_scenes(&pid, &[]),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_partial_tts_resumes_at_cursor() {
        let (_dir, mut machine, pid) = machine();
        machine.approve_scenes(&pid, &ids(&["s1", "s2", "s3"])).unwrap();
        machine
            .partial_tts(&pid, &[PathBuf::from("a/s1_audio.mp3")], 2)
            .unwrap();

        let resume = machine.resume_point();
        assert_eq!(resume.phase, Phase::TtsPartial);
        assert_eq!(resume.scene_index, Some(2));
        assert_eq!(resume.command.as_deref(), Some("tts-all --from 2"));

        machine.complete_tts(&pid, &[PathBuf::from("a/s1_audio.mp3")]).unwrap();
        assert_eq!(machine.record().resume_cursor, None);
        assert_eq!(machine.record().file_registry.audio.len(), 1);
    }

    #[test]
    fn test_narration_needs_approved_scenes() {
        let (_dir, mut machine, pid) = machine();
        assert!(matches!(
            machine.complete_tts(&pid, &[]),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            machine.partial_tts(&pid, &[], 1),
            Err(PipelineError::InvalidInput(_))
        ));
        assert_eq!(machine.record().current_phase, Phase::Initialized);

        // Roster present but the phase went back to an earlier stage.
        machine.approve_scenes(&pid, &ids(&["s1"])).unwrap();
        machine.approve_script(&pid).unwrap();
        assert!(machine.complete_tts(&pid, &[]).is_err());
    }

    #[test]
    fn test_complete_scene_code_is_idempotent() {
        let (_dir, mut machine, pid) = machine();
        machine.approve_scenes(&pid, &ids(&["s1", "s2"])).unwrap();
        machine.complete_tts(&pid, &[]).unwrap();

        let s1 = SceneId::from("s1");
        let code = PathBuf::from("4_manim_code/s1_manim.py");
        machine.complete_scene_code(&s1, &code).unwrap();
        let record = machine.complete_scene_code(&s1, &code).unwrap();

        assert_eq!(record.scene_roster.completed.iter().filter(|id| **id == s1).count(), 1);
        assert_eq!(record.scene_roster.current, Some(SceneId::from("s2")));
        assert_eq!(record.current_phase, Phase::ManimCoding);
        assert_eq!(record.file_registry.animation_source.len(), 1);

        let record = machine
            .complete_scene_code(&SceneId::from("s2"), Path::new("4_manim_code/s2_manim.py"))
            .unwrap();
        assert_eq!(record.current_phase, Phase::ManimCompleted);
        assert!(record.scene_roster.pending.is_empty());
        assert_eq!(record.scene_roster.current, None);
    }

    #[test]
    fn test_unknown_scene_cannot_be_coded() {
        let (_dir, mut machine, pid) = machine();
        machine.approve_scenes(&pid, &ids(&["s1", "s2"])).unwrap();
        machine.complete_tts(&pid, &[]).unwrap();

        let err = machine
            .complete_scene_code(&SceneId::from("s99"), Path::new("4_manim_code/s99_manim.py"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let record = machine.record();
        assert!(record.scene_roster.completed.is_empty());
        assert_eq!(record.scene_roster.progress(), (0, 2));
        assert_eq!(record.current_phase, Phase::TtsCompleted);
    }

    #[test]
    fn test_reload_picks_up_external_edit() {
        let (dir, mut machine, _pid) = machine();
        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        let edited = raw.replace("\"initialized\"", "\"rendered\"");
        std::fs::write(dir.path().join("state.json"), edited).unwrap();

        assert_eq!(machine.record().current_phase, Phase::Initialized);
        assert_eq!(machine.reload().current_phase, Phase::Rendered);
        assert_eq!(machine.resume_point().command.as_deref(), Some("compose-all"));
    }

    #[test]
    fn test_every_phase_has_a_resume_point() {
        let phases = [
            Phase::Idle,
            Phase::Initialized,
            Phase::ScriptApproved,
            Phase::ScenesApproved,
            Phase::TtsCompleted,
            Phase::TtsPartial,
            Phase::ManimCoding,
            Phase::ManimCompleted,
            Phase::Rendering,
            Phase::Rendered,
            Phase::Completed,
            Phase::Unknown,
        ];
        for phase in phases {
            let record = PhaseRecord {
                current_phase: phase,
                ..Default::default()
            };
            let point = resume_point_for(&record);
            assert!(!point.message.is_empty(), "{} has no message", phase);
        }
    }

    #[test]
    fn test_straight_line_to_completion() {
        let (_dir, mut machine, _pid) = machine();
        machine.start_rendering().unwrap();
        machine.mark_rendered(&[PathBuf::from("8_renders/s1.mov")]).unwrap();
        let record = machine.complete(Path::new("final_video.mp4")).unwrap();
        assert_eq!(record.current_phase, Phase::Completed);
        assert_eq!(record.file_registry.final_video, vec![PathBuf::from("final_video.mp4")]);
        assert!(machine.resume_point().command.is_none());
    }
}
