// types.rs - Common data structures for all modules
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::scene_id::SceneId;

// Media metadata as reported by ffprobe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub file_path: String,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
    pub has_video: bool,
    pub format: String,
    pub file_size_mb: f64,
}

// ============================================================================
// PROJECT SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    /// Output canvas in pixels.
    pub fn canvas(&self) -> (u32, u32) {
        match self {
            AspectRatio::Landscape => (1920, 1080),
            AspectRatio::Portrait => (1080, 1920),
            AspectRatio::Square => (1080, 1080),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "16:9" => Some(AspectRatio::Landscape),
            "9:16" => Some(AspectRatio::Portrait),
            "1:1" => Some(AspectRatio::Square),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub style: String,
    pub difficulty: String,
    /// Target length in seconds (informational).
    pub duration: u32,
    pub aspect_ratio: AspectRatio,
    pub voice: String,
    pub subtitle_style: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            style: "cyberpunk".to_string(),
            difficulty: "intermediate".to_string(),
            duration: 480,
            aspect_ratio: AspectRatio::Landscape,
            voice: "ko-KR-Neural2-C".to_string(),
            subtitle_style: "karaoke".to_string(),
        }
    }
}

// ============================================================================
// SCENES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: SceneId,
    /// Human-facing narration; may carry `;;` subtitle split markers.
    #[serde(default)]
    pub narration_display: String,
    /// Spoken narration with numerals and symbols spelled out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_tts: Option<String>,
    /// Explicit subtitle text; wins over `narration_display` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_display: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub required_assets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_concept: Option<String>,
}

impl Scene {
    /// Text sent to the synthesis service.
    pub fn spoken_text(&self) -> &str {
        match self.narration_tts.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => &self.narration_display,
        }
    }

    /// Authored text the subtitles are cut from.
    pub fn subtitle_text(&self) -> &str {
        match self.subtitle_display.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => &self.narration_display,
        }
    }
}

/// On-disk scene list document (`2_scenes/scenes.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneList {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub total_scenes: usize,
    #[serde(default)]
    pub total_duration: f64,
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub created_at: Option<DateTime<Local>>,
}

impl SceneList {
    pub fn new(project_id: &str, scenes: Vec<Scene>) -> Self {
        Self {
            project_id: Some(project_id.to_string()),
            total_scenes: scenes.len(),
            total_duration: scenes.iter().map(|s| s.duration).sum(),
            scenes,
            created_at: Some(Local::now()),
        }
    }

    /// Scenes sorted into canonical id order.
    pub fn canonical(&self) -> Vec<Scene> {
        let mut scenes = self.scenes.clone();
        scenes.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        scenes
    }

    pub fn scene_ids(&self) -> Vec<SceneId> {
        self.canonical().into_iter().map(|s| s.scene_id).collect()
    }
}

// ============================================================================
// TRANSCRIPTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    #[serde(alias = "word")]
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub full_text: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

// ============================================================================
// TIMING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceWindow {
    pub index: usize,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl SentenceWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Which reconciliation strategy produced a timing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMethod {
    /// One authored sentence spanning the whole clip.
    SingleSentence,
    /// Recognizer segments mapped 1:1 onto authored sentences.
    SegmentMatch,
    /// Duration split into equal windows.
    EqualDistribution,
    /// No sentences or no usable duration; no subtitles.
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudioReference {
    Single(PathBuf),
    Multiple(Vec<PathBuf>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingRecord {
    pub scene_id: SceneId,
    pub total_duration: f64,
    pub sentences: Vec<SentenceWindow>,
    pub audio_reference: AudioReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcribed_text: Option<String>,
    pub method: TimingMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_to_landscape() {
        assert_eq!(AspectRatio::default(), AspectRatio::Landscape);
        let settings: ProjectSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.aspect_ratio, AspectRatio::Landscape);
        assert_eq!(settings.aspect_ratio.canvas(), (1920, 1080));
    }
}
