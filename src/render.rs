// src/render.rs
//! Animation rendering through the external `manim` executable.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use crate::error::{PipelineError, PipelineResult};
use crate::jobs::BatchReport;
use crate::scene_id::SceneId;
use crate::store::ArtifactStore;
use crate::utils::execute_logged_command;
use crate::workflow::{ArtifactCategory, PhaseStateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RenderQuality {
    #[default]
    Low,
    Medium,
    High,
    #[value(name = "4k")]
    UltraHigh,
}

impl RenderQuality {
    pub fn flag(&self) -> &'static str {
        match self {
            RenderQuality::Low => "-ql",
            RenderQuality::Medium => "-qm",
            RenderQuality::High => "-qh",
            RenderQuality::UltraHigh => "-qk",
        }
    }

    /// Renderer's output sub-folder for this quality.
    pub fn output_dir(&self) -> &'static str {
        match self {
            RenderQuality::Low => "480p15",
            RenderQuality::Medium => "720p30",
            RenderQuality::High => "1080p60",
            RenderQuality::UltraHigh => "2160p60",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationRenderer {
    manim: String,
    /// Working directory; the renderer writes under `<root>/media`.
    work_root: PathBuf,
    quality: RenderQuality,
    transparent: bool,
}

impl AnimationRenderer {
    pub fn new(manim: impl Into<String>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            manim: manim.into(),
            work_root: work_root.into(),
            quality: RenderQuality::default(),
            transparent: true,
        }
    }

    pub fn with_quality(mut self, quality: RenderQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn media_dir(&self) -> PathBuf {
        self.work_root.join("media")
    }

    /// Where the renderer leaves clips for `scene`.
    pub fn output_dir_for(&self, scene: &SceneId) -> PathBuf {
        self.media_dir()
            .join("videos")
            .join(format!("{}_manim", scene))
            .join(self.quality.output_dir())
    }

    pub fn build_args(&self, store: &ArtifactStore, scene: &SceneId) -> PipelineResult<Vec<String>> {
        let source = store.animation_source_path(scene);
        if !source.is_file() {
            return Err(PipelineError::MissingArtifact {
                scene: scene.clone(),
                kind: "animation source",
                path: source,
            });
        }
        let mut args = vec![self.quality.flag().to_string()];
        if self.transparent {
            args.push("--transparent".into());
        }
        args.push("--media_dir".into());
        args.push(self.media_dir().to_string_lossy().to_string());
        args.push(source.to_string_lossy().to_string());
        args.push(scene.class_name());
        Ok(args)
    }

    /// Render one scene and copy the clip into the renders folder.
    pub fn render_scene(&self, store: &ArtifactStore, scene: &SceneId) -> PipelineResult<PathBuf> {
        let args = self.build_args(store, scene)?;
        let mut command = Command::new(&self.manim);
        command.args(&args).current_dir(&self.work_root);

        tracing::info!("🎬 Rendering {} ({:?})", scene, self.quality);
        execute_logged_command(command, &store.render_log_path(scene))?;

        let produced = find_newest_clip(&self.output_dir_for(scene)).ok_or_else(|| {
            PipelineError::MissingArtifact {
                scene: scene.clone(),
                kind: "renderer output",
                path: self.output_dir_for(scene),
            }
        })?;
        let extension = produced
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_lowercase();
        let target = store.render_target(scene, &extension);
        fs::create_dir_all(store.renders_dir())?;
        fs::copy(&produced, &target)?;
        tracing::info!("📦 {} -> {}", produced.display(), target.display());
        Ok(target)
    }

    /// Render every scene with animation source, in canonical order, one at
    /// a time.
    pub fn render_all(
        &self,
        machine: &mut PhaseStateMachine,
        scene_ids: &[SceneId],
    ) -> PipelineResult<BatchReport> {
        let store = machine.store()?;
        machine.start_rendering()?;

        let mut ids = scene_ids.to_vec();
        ids.sort();
        let mut report = BatchReport::new("render-all");

        for (i, scene) in ids.iter().enumerate() {
            if !store.animation_source_path(scene).is_file() {
                tracing::warn!("⏭️ {} has no animation source, skipping", scene);
                report.skipped.push(scene.clone());
                continue;
            }
            tracing::info!("[{}/{}] {}", i + 1, ids.len(), scene);
            match self.render_scene(&store, scene) {
                Ok(path) => {
                    machine.register_artifact(ArtifactCategory::Renders, &path)?;
                    report.succeeded.push(scene.clone());
                }
                Err(e) => {
                    tracing::error!("❌ {} render failed: {}", scene, e);
                    report.failed.push((scene.clone(), e.to_string()));
                }
            }
        }

        if self.finish_if_all_rendered(machine, &store, &ids)? {
            report.next_command = Some("compose-all".into());
        } else if let Some((first_failed, _)) = report.failed.first() {
            report.next_command = Some(format!("render --scene {}", first_failed));
        } else if let Some(first_skipped) = report.skipped.first() {
            report.next_command = Some(format!("scene-done --scene {} --file <path>", first_skipped));
        }
        Ok(report)
    }
}

impl AnimationRenderer {
    /// Render one scene (e.g. a retry after `render-all`), advancing to
    /// `rendered` if that was the last clip missing.
    pub fn render_one(
        &self,
        machine: &mut PhaseStateMachine,
        scene: &SceneId,
        scene_ids: &[SceneId],
    ) -> PipelineResult<BatchReport> {
        let store = machine.store()?;
        let mut report = BatchReport::new("render");
        match self.render_scene(&store, scene) {
            Ok(path) => {
                machine.register_artifact(ArtifactCategory::Renders, &path)?;
                report.succeeded.push(scene.clone());
            }
            Err(e) => {
                tracing::error!("❌ {} render failed: {}", scene, e);
                report.failed.push((scene.clone(), e.to_string()));
                report.next_command = Some(format!("render --scene {}", scene));
                return Ok(report);
            }
        }

        report.next_command = if self.finish_if_all_rendered(machine, &store, scene_ids)? {
            Some("compose-all".into())
        } else {
            scene_ids
                .iter()
                .find(|s| store.rendered_clip(s).is_none())
                .map(|s| format!("render --scene {}", s))
        };
        Ok(report)
    }

    /// Mark the project `rendered` once every scene has a clip.
    pub fn finish_if_all_rendered(
        &self,
        machine: &mut PhaseStateMachine,
        store: &ArtifactStore,
        scene_ids: &[SceneId],
    ) -> PipelineResult<bool> {
        if scene_ids.is_empty() {
            return Ok(false);
        }
        let rendered: Vec<PathBuf> = scene_ids.iter().filter_map(|s| store.rendered_clip(s)).collect();
        if rendered.len() != scene_ids.len() {
            return Ok(false);
        }
        machine.mark_rendered(&rendered)?;
        Ok(true)
    }
}

/// Newest `.mov`/`.mp4` in `dir`, if any.
pub fn find_newest_clip(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("mov") || e.eq_ignore_ascii_case("mp4"))
                .unwrap_or(false)
        })
        .max_by_key(|p| {
            fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectSettings;
    use tempfile::tempdir;

    #[test]
    fn test_quality_flags_and_dirs() {
        assert_eq!(RenderQuality::Low.flag(), "-ql");
        assert_eq!(RenderQuality::UltraHigh.flag(), "-qk");
        assert_eq!(RenderQuality::High.output_dir(), "1080p60");
    }

    #[test]
    fn test_build_args_uses_class_name_and_transparency() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "P1");
        let s3 = SceneId::from("s3");
        let renderer = AnimationRenderer::new("manim", dir.path()).with_quality(RenderQuality::Medium);

        let err = renderer.build_args(&store, &s3).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { kind: "animation source", .. }));

        store.save_animation_source(&s3, "class S3(Scene): pass").unwrap();
        let args = renderer.build_args(&store, &s3).unwrap();
        assert_eq!(args[0], "-qm");
        assert_eq!(args[1], "--transparent");
        assert!(args[args.len() - 2].ends_with("4_manim_code/s3_manim.py"));
        assert_eq!(args.last().unwrap(), "S3");
        assert!(renderer
            .output_dir_for(&s3)
            .ends_with("media/videos/s3_manim/720p30"));

        let opaque = renderer.clone().with_transparency(false).build_args(&store, &s3).unwrap();
        assert!(!opaque.iter().any(|a| a == "--transparent"));
    }

    #[test]
    fn test_find_newest_clip_ignores_other_files() {
        let dir = tempdir().unwrap();
        assert!(find_newest_clip(&dir.path().join("absent")).is_none());
        fs::write(dir.path().join("S1.log"), b"x").unwrap();
        fs::write(dir.path().join("S1.mov"), b"x").unwrap();
        assert!(find_newest_clip(dir.path()).unwrap().ends_with("S1.mov"));
    }

    #[test]
    fn test_render_all_skips_scenes_without_source() {
        let dir = tempdir().unwrap();
        let mut machine =
            PhaseStateMachine::new(dir.path().join("state.json"), dir.path().join("output"));
        machine.initialize("Skips", ProjectSettings::default()).unwrap();
        let renderer = AnimationRenderer::new("manim", dir.path());

        let ids = vec![SceneId::from("s2"), SceneId::from("s1")];
        let report = renderer.render_all(&mut machine, &ids).unwrap();
        assert_eq!(report.skipped, vec![SceneId::from("s1"), SceneId::from("s2")]);
        assert!(report.succeeded.is_empty());
        assert_eq!(
            report.next_command.as_deref(),
            Some("scene-done --scene s1 --file <path>")
        );
        assert_eq!(machine.record().current_phase, crate::workflow::Phase::Rendering);
    }

    #[test]
    fn test_last_missing_clip_advances_to_rendered() {
        let dir = tempdir().unwrap();
        let mut machine =
            PhaseStateMachine::new(dir.path().join("state.json"), dir.path().join("output"));
        machine.initialize("Retry", ProjectSettings::default()).unwrap();
        machine.start_rendering().unwrap();
        let store = machine.store().unwrap();
        let renderer = AnimationRenderer::new("manim", store.root());
        let ids = vec![SceneId::from("s1"), SceneId::from("s2")];

        // s2 failed in the batch and has no source yet, so the retry fails too.
        fs::write(store.render_target(&ids[0], "mov"), b"clip").unwrap();
        let report = renderer.render_one(&mut machine, &ids[1], &ids).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.next_command.as_deref(), Some("render --scene s2"));
        assert!(!renderer.finish_if_all_rendered(&mut machine, &store, &ids).unwrap());
        assert_eq!(machine.record().current_phase, crate::workflow::Phase::Rendering);

        fs::write(store.render_target(&ids[1], "mp4"), b"clip").unwrap();
        assert!(renderer.finish_if_all_rendered(&mut machine, &store, &ids).unwrap());
        assert_eq!(machine.record().current_phase, crate::workflow::Phase::Rendered);
        assert_eq!(machine.record().file_registry.renders.len(), 2);
        assert_eq!(machine.resume_point().command.as_deref(), Some("compose-all"));
    }
}
