// src/error.rs
//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;
use thiserror::Error;

use crate::scene_id::SceneId;

/// Failures reported by an external speech service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Transient throttling; worth waiting out locally.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Hard daily/account cap. Retrying locally cannot help.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("service failure: {0}")]
    Failed(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_))
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("transient service error: {0}")]
    TransientService(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("{scene}: missing {kind} ({})", path.display())]
    MissingArtifact {
        scene: SceneId,
        kind: &'static str,
        path: PathBuf,
    },

    #[error("{scene}: degraded input, {detail}")]
    DegradedInput { scene: SceneId, detail: String },

    #[error("corrupt state document {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    ExternalProcess {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("service error: {0}")]
    Service(String),

    #[error("no active project, run `init` first")]
    NoActiveProject,

    #[error("project mismatch: state holds {active}, got {requested}")]
    ProjectMismatch { active: String, requested: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<ServiceError> for PipelineError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::RateLimited(msg) => PipelineError::TransientService(msg),
            ServiceError::QuotaExceeded(msg) => PipelineError::QuotaExhausted(msg),
            ServiceError::Failed(msg) => PipelineError::Service(msg),
        }
    }
}

impl PipelineError {
    /// Batch-fatal errors stop the remaining work and leave a checkpoint.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, PipelineError::QuotaExhausted(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
