// src/store.rs
//! Per-project artifact tree. Paths are derived from the scene id and a fixed
//! category; nothing here knows about phases.

use chrono::Local;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};
use crate::scene_id::SceneId;
use crate::types::{Scene, SceneList, TimingRecord};

pub const PROJECT_FOLDERS: &[&str] = &[
    "0_audio",
    "1_script",
    "2_scenes",
    "3_visual_plans",
    "4_manim_code",
    "5_validation",
    "6_image_prompts",
    "7_subtitles",
    "8_renders",
    "9_backgrounds",
    "10_scene_final",
    "logs",
];

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
pub const RENDER_EXTENSIONS: &[&str] = &["mov", "mp4"];

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    project_id: String,
    root: PathBuf,
}

/// Outcome of importing background images.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: Vec<(PathBuf, PathBuf)>,
    pub unmatched_scenes: Vec<SceneId>,
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundCheck {
    pub present: Vec<(SceneId, PathBuf)>,
    pub missing: Vec<SceneId>,
}

impl ArtifactStore {
    pub fn new(output_root: impl AsRef<Path>, project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            root: output_root.as_ref().join(project_id),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the full folder tree.
    pub fn create_layout(&self) -> PipelineResult<()> {
        for folder in PROJECT_FOLDERS {
            fs::create_dir_all(self.root.join(folder))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    pub fn script_path(&self) -> PathBuf {
        self.root.join("1_script").join("reading_script.json")
    }

    pub fn tts_script_path(&self) -> PathBuf {
        self.root.join("1_script").join("tts_script.json")
    }

    pub fn scenes_path(&self) -> PathBuf {
        self.root.join("2_scenes").join("scenes.json")
    }

    pub fn audio_path(&self, scene: &SceneId) -> PathBuf {
        self.root.join("0_audio").join(format!("{}_audio.mp3", scene))
    }

    pub fn timing_path(&self, scene: &SceneId) -> PathBuf {
        self.root.join("0_audio").join(format!("{}_timing.json", scene))
    }

    pub fn animation_source_path(&self, scene: &SceneId) -> PathBuf {
        self.root.join("4_manim_code").join(format!("{}_manim.py", scene))
    }

    pub fn subtitle_path(&self, scene: &SceneId) -> PathBuf {
        self.root.join("7_subtitles").join(format!("{}.srt", scene))
    }

    pub fn renders_dir(&self) -> PathBuf {
        self.root.join("8_renders")
    }

    /// Target path for a freshly rendered clip with the given extension.
    pub fn render_target(&self, scene: &SceneId, extension: &str) -> PathBuf {
        self.renders_dir().join(format!("{}.{}", scene, extension))
    }

    /// Existing rendered clip, transparent `.mov` preferred over `.mp4`.
    pub fn rendered_clip(&self, scene: &SceneId) -> Option<PathBuf> {
        RENDER_EXTENSIONS
            .iter()
            .map(|ext| self.render_target(scene, ext))
            .find(|p| p.is_file())
    }

    pub fn backgrounds_dir(&self) -> PathBuf {
        self.root.join("9_backgrounds")
    }

    pub fn background(&self, scene: &SceneId) -> Option<PathBuf> {
        IMAGE_EXTENSIONS
            .iter()
            .map(|ext| self.backgrounds_dir().join(format!("{}_bg.{}", scene, ext)))
            .find(|p| p.is_file())
    }

    pub fn composed_path(&self, scene: &SceneId) -> PathBuf {
        self.root.join("10_scene_final").join(format!("{}_final.mp4", scene))
    }

    pub fn final_path(&self) -> PathBuf {
        self.root.join("final_video.mp4")
    }

    pub fn render_log_path(&self, scene: &SceneId) -> PathBuf {
        self.root.join("logs").join(format!("{}_render.log", scene))
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    pub fn save_scenes(&self, scenes: Vec<Scene>) -> PipelineResult<PathBuf> {
        let path = self.scenes_path();
        let list = SceneList::new(&self.project_id, scenes);
        write_json(&path, &list)?;
        Ok(path)
    }

    pub fn load_scenes(&self) -> PipelineResult<SceneList> {
        read_json(&self.scenes_path())
    }

    pub fn save_timing(&self, timing: &TimingRecord) -> PipelineResult<PathBuf> {
        let path = self.timing_path(&timing.scene_id);
        write_json(&path, timing)?;
        Ok(path)
    }

    pub fn load_timing(&self, scene: &SceneId) -> PipelineResult<Option<TimingRecord>> {
        let path = self.timing_path(scene);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn save_audio(&self, scene: &SceneId, bytes: &[u8]) -> PipelineResult<PathBuf> {
        let path = self.audio_path(scene);
        ensure_parent(&path)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn save_subtitles(&self, scene: &SceneId, srt: &str) -> PipelineResult<PathBuf> {
        let path = self.subtitle_path(scene);
        ensure_parent(&path)?;
        fs::write(&path, srt)?;
        Ok(path)
    }

    pub fn save_animation_source(&self, scene: &SceneId, code: &str) -> PipelineResult<PathBuf> {
        let path = self.animation_source_path(scene);
        ensure_parent(&path)?;
        fs::write(&path, code)?;
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Backgrounds
    // ------------------------------------------------------------------

    /// Copy images from `source_dir` into the backgrounds folder.
    ///
    /// Images whose stem contains a scene id are matched first; remaining
    /// images fill remaining scenes in canonical order. Existing backgrounds
    /// are never overwritten.
    pub fn import_backgrounds(
        &self,
        source_dir: &Path,
        scene_ids: &[SceneId],
    ) -> PipelineResult<ImportReport> {
        let mut images: Vec<PathBuf> = fs::read_dir(source_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_extension(p, IMAGE_EXTENSIONS))
            .collect();
        images.sort();

        if images.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "no images found in {}",
                source_dir.display()
            )));
        }

        let mut scenes = scene_ids.to_vec();
        scenes.sort();
        fs::create_dir_all(self.backgrounds_dir())?;

        let mut report = ImportReport::default();
        let mut used = vec![false; images.len()];

        // Longest ids first so `s12` is not claimed by `s1`.
        let mut by_length = scenes.clone();
        by_length.sort_by(|a, b| b.as_str().len().cmp(&a.as_str().len()).then(a.cmp(b)));
        for scene in &by_length {
            if self.background(scene).is_some() {
                continue;
            }
            let found = images.iter().enumerate().find(|(i, img)| {
                !used[*i] && stem_matches_scene(img, scene)
            });
            if let Some((i, img)) = found {
                let dest = self.copy_background(scene, img)?;
                used[i] = true;
                report.imported.push((img.clone(), dest));
            }
        }

        let mut remaining = images
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .map(|(_, img)| img);
        for scene in &scenes {
            if self.background(scene).is_some() {
                continue;
            }
            match remaining.next() {
                Some(img) => {
                    let dest = self.copy_background(scene, img)?;
                    report.imported.push((img.clone(), dest));
                }
                None => report.unmatched_scenes.push(scene.clone()),
            }
        }

        tracing::info!(
            "🖼️ Imported {} background(s), {} scene(s) still without one",
            report.imported.len(),
            report.unmatched_scenes.len()
        );
        Ok(report)
    }

    fn copy_background(&self, scene: &SceneId, image: &Path) -> PipelineResult<PathBuf> {
        let ext = image
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let dest = self.backgrounds_dir().join(format!("{}_bg.{}", scene, ext));
        fs::copy(image, &dest)?;
        Ok(dest)
    }

    pub fn check_backgrounds(&self, scene_ids: &[SceneId]) -> BackgroundCheck {
        let mut scenes = scene_ids.to_vec();
        scenes.sort();
        let mut check = BackgroundCheck::default();
        for scene in scenes {
            match self.background(&scene) {
                Some(path) => check.present.push((scene, path)),
                None => check.missing.push(scene),
            }
        }
        check
    }
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// `s1` matches `s1.png`, `bg_s1.png`, `s1-final.png` but not `s12.png`.
fn stem_matches_scene(image: &Path, scene: &SceneId) -> bool {
    let stem = match image.file_stem().and_then(|s| s.to_str()) {
        Some(s) => s.to_lowercase(),
        None => return false,
    };
    let id = scene.as_str().to_lowercase();
    stem.match_indices(&id).any(|(pos, _)| {
        let before_ok = stem[..pos]
            .chars()
            .last()
            .map(|c| !c.is_ascii_alphanumeric())
            .unwrap_or(true);
        let after_ok = stem[pos + id.len()..]
            .chars()
            .next()
            .map(|c| !c.is_ascii_alphanumeric())
            .unwrap_or(true);
        before_ok && after_ok
    })
}

pub fn ensure_parent(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Time-derived project id, e.g. `P20260113_194549`.
pub fn new_project_id() -> String {
    format!("P{}", Local::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioReference, TimingMethod};
    use tempfile::tempdir;

    fn scene(id: &str) -> Scene {
        Scene {
            scene_id: SceneId::from(id),
            narration_display: format!("narration for {}", id),
            narration_tts: None,
            subtitle_display: None,
            duration: 10.0,
            required_assets: Vec::new(),
            visual_concept: None,
        }
    }

    #[test]
    fn test_layout_and_naming() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "P20260101_000000");
        store.create_layout().unwrap();
        for folder in PROJECT_FOLDERS {
            assert!(store.root().join(folder).is_dir());
        }
        let s1 = SceneId::from("s1");
        assert!(store.audio_path(&s1).ends_with("0_audio/s1_audio.mp3"));
        assert!(store.timing_path(&s1).ends_with("0_audio/s1_timing.json"));
        assert!(store.composed_path(&s1).ends_with("10_scene_final/s1_final.mp4"));
    }

    #[test]
    fn test_rendered_clip_prefers_mov() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "P1");
        store.create_layout().unwrap();
        let s1 = SceneId::from("s1");
        assert!(store.rendered_clip(&s1).is_none());
        fs::write(store.render_target(&s1, "mp4"), b"x").unwrap();
        assert!(store.rendered_clip(&s1).unwrap().ends_with("s1.mp4"));
        fs::write(store.render_target(&s1, "mov"), b"x").unwrap();
        assert!(store.rendered_clip(&s1).unwrap().ends_with("s1.mov"));
    }

    #[test]
    fn test_scene_and_timing_documents() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "P1");
        store.save_scenes(vec![scene("s2"), scene("s10"), scene("s1")]).unwrap();
        let list = store.load_scenes().unwrap();
        assert_eq!(list.total_scenes, 3);
        assert_eq!(list.total_duration, 30.0);
        let ids: Vec<String> = list.scene_ids().iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s10"]);

        let s1 = SceneId::from("s1");
        assert!(store.load_timing(&s1).unwrap().is_none());
        let timing = TimingRecord {
            scene_id: s1.clone(),
            total_duration: 3.0,
            sentences: Vec::new(),
            audio_reference: AudioReference::Single(store.audio_path(&s1)),
            transcribed_text: None,
            method: TimingMethod::Empty,
            voice: None,
            created_at: None,
        };
        store.save_timing(&timing).unwrap();
        assert_eq!(store.load_timing(&s1).unwrap().unwrap().total_duration, 3.0);
    }

    #[test]
    fn test_import_backgrounds_by_name_then_order() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("incoming");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a_first.png"), b"1").unwrap();
        fs::write(source.join("s12_bridge.jpg"), b"2").unwrap();
        fs::write(source.join("notes.txt"), b"skip").unwrap();

        let store = ArtifactStore::new(dir.path().join("output"), "P1");
        store.create_layout().unwrap();
        let scenes = vec![SceneId::from("s1"), SceneId::from("s12"), SceneId::from("s2")];
        let report = store.import_backgrounds(&source, &scenes).unwrap();

        assert_eq!(report.imported.len(), 2);
        assert!(store.background(&SceneId::from("s12")).unwrap().ends_with("s12_bg.jpg"));
        assert!(store.background(&SceneId::from("s1")).unwrap().ends_with("s1_bg.png"));
        assert_eq!(report.unmatched_scenes, vec![SceneId::from("s2")]);

        let check = store.check_backgrounds(&scenes);
        assert_eq!(check.present.len(), 2);
        assert_eq!(check.missing, vec![SceneId::from("s2")]);
    }

    #[test]
    fn test_stem_matching_respects_boundaries() {
        let s1 = SceneId::from("s1");
        assert!(stem_matches_scene(Path::new("bg_s1.png"), &s1));
        assert!(stem_matches_scene(Path::new("S1.png"), &s1));
        assert!(!stem_matches_scene(Path::new("s12.png"), &s1));
    }
}
