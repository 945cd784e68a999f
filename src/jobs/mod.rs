// src/jobs/mod.rs
//! Batch jobs over all scenes of a project.
//! Every batch ends with explicit counts and, when something is left to do,
//! the literal command that continues it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scene_id::SceneId;
use crate::CLI_NAME;

pub mod compose_job;
pub mod tts_job;

/// Per-scene result of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SceneOutcome {
    Succeeded { duration_seconds: f64 },
    /// Below the resume index; previously persisted result reused.
    Reused { duration_seconds: f64 },
    Failed { error: String },
    /// Never scheduled because the batch stopped early.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub operation: &'static str,
    pub succeeded: Vec<SceneId>,
    pub reused: Vec<SceneId>,
    pub failed: Vec<(SceneId, String)>,
    pub skipped: Vec<SceneId>,
    pub cancelled: Vec<SceneId>,
    /// Sum of scene durations (seconds) where the batch knows them.
    pub total_duration: f64,
    /// Set when the batch stopped on a batch-fatal error.
    pub stopped_reason: Option<String>,
    /// CLI arguments that continue or follow this batch.
    pub next_command: Option<String>,
}

impl BatchReport {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            ..Default::default()
        }
    }

    pub fn record(&mut self, scene: &SceneId, outcome: &SceneOutcome) {
        match outcome {
            SceneOutcome::Succeeded { duration_seconds } => {
                self.succeeded.push(scene.clone());
                self.total_duration += duration_seconds;
            }
            SceneOutcome::Reused { duration_seconds } => {
                self.reused.push(scene.clone());
                self.total_duration += duration_seconds;
            }
            SceneOutcome::Failed { error } => self.failed.push((scene.clone(), error.clone())),
            SceneOutcome::Cancelled => self.cancelled.push(scene.clone()),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty() && self.stopped_reason.is_none()
    }

    /// Full command line for the next step.
    pub fn next_command_line(&self) -> Option<String> {
        self.next_command
            .as_ref()
            .map(|args| format!("{} {}", CLI_NAME, args))
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── {} ──", self.operation)?;
        writeln!(
            f,
            "  succeeded: {}  reused: {}  failed: {}  skipped: {}  cancelled: {}",
            self.succeeded.len(),
            self.reused.len(),
            self.failed.len(),
            self.skipped.len(),
            self.cancelled.len()
        )?;
        if self.total_duration > 0.0 {
            writeln!(f, "  total duration: {:.1}s", self.total_duration)?;
        }
        for (scene, error) in &self.failed {
            writeln!(f, "  ❌ {}: {}", scene, error)?;
        }
        if let Some(reason) = &self.stopped_reason {
            writeln!(f, "  ⏸️ stopped: {}", reason)?;
        }
        match self.next_command_line() {
            Some(cmd) => write!(f, "  next: {}", cmd),
            None => write!(f, "  nothing left to do"),
        }
    }
}
