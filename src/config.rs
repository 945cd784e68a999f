// src/config.rs
//! Runtime configuration, read once from the environment (after `.env`).

use std::path::PathBuf;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    Google,
    ElevenLabs,
}

impl TtsProvider {
    fn parse(value: &str) -> PipelineResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "google" => Ok(TtsProvider::Google),
            "elevenlabs" | "eleven_labs" => Ok(TtsProvider::ElevenLabs),
            other => Err(PipelineError::Config(format!(
                "unknown TTS_PROVIDER '{}', expected google or elevenlabs",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub state_file: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub manim_path: String,
    pub tts_provider: TtsProvider,
    pub google_tts_api_key: Option<String>,
    pub google_tts_language: String,
    pub elevenlabs_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub tts_max_attempts: u32,
    pub tts_workers: usize,
    pub tts_initial_backoff_ms: u64,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub asset_bucket: String,
    pub assets_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            state_file: PathBuf::from("state.json"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            manim_path: "manim".to_string(),
            tts_provider: TtsProvider::Google,
            google_tts_api_key: None,
            google_tts_language: "ko-KR".to_string(),
            elevenlabs_api_key: None,
            openai_api_key: None,
            tts_max_attempts: 5,
            tts_workers: 1,
            tts_initial_backoff_ms: 1000,
            supabase_url: None,
            supabase_service_key: None,
            asset_bucket: "math-video-assets".to_string(),
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let tts_provider = match get("TTS_PROVIDER") {
            Some(value) => TtsProvider::parse(&value)?,
            None => defaults.tts_provider,
        };

        let tts_workers = parse_number(get("TTS_WORKERS"), "TTS_WORKERS", defaults.tts_workers)?;
        if tts_workers == 0 {
            return Err(PipelineError::Config("TTS_WORKERS must be at least 1".into()));
        }

        Ok(Self {
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            state_file: get("STATE_FILE").map(PathBuf::from).unwrap_or(defaults.state_file),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: get("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            manim_path: get("MANIM_PATH").unwrap_or(defaults.manim_path),
            tts_provider,
            google_tts_api_key: get("GOOGLE_TTS_API_KEY"),
            google_tts_language: get("GOOGLE_TTS_LANGUAGE").unwrap_or(defaults.google_tts_language),
            elevenlabs_api_key: get("ELEVENLABS_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            tts_max_attempts: parse_number(
                get("TTS_MAX_ATTEMPTS"),
                "TTS_MAX_ATTEMPTS",
                defaults.tts_max_attempts,
            )?,
            tts_workers,
            tts_initial_backoff_ms: parse_number(
                get("TTS_INITIAL_BACKOFF_MS"),
                "TTS_INITIAL_BACKOFF_MS",
                defaults.tts_initial_backoff_ms,
            )?,
            supabase_url: get("SUPABASE_URL"),
            supabase_service_key: get("SUPABASE_SERVICE_KEY"),
            asset_bucket: get("ASSET_BUCKET").unwrap_or(defaults.asset_bucket),
            assets_dir: get("ASSETS_DIR").map(PathBuf::from).unwrap_or(defaults.assets_dir),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> PipelineResult<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| PipelineError::Config(format!("{} is not a valid number: '{}'", key, raw))),
        None => Ok(default),
    }
}
