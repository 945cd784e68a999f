// lib.rs - Main library file that exports all modules
pub mod asset_catalog;
pub mod compose;
pub mod config;
pub mod core;
pub mod elevenlabs_client;
pub mod error;
pub mod google_tts_client;
pub mod jobs;
pub mod render;
pub mod scene_id;
pub mod services;
pub mod store;
pub mod subtitle;
pub mod timing;
pub mod types;
pub mod utils;
pub mod whisper_client;
pub mod workflow;

/// Binary name used when printing follow-up commands.
pub const CLI_NAME: &str = "math-video-maker";

// Re-export commonly used types for convenience
pub use error::{PipelineError, PipelineResult, ServiceError};
pub use scene_id::SceneId;
pub use types::*;
