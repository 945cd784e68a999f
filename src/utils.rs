// utils.rs - External process helpers (ffmpeg, ffprobe, renderer)
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use crate::error::{PipelineError, PipelineResult};

/// Format duration in HH:MM:SS.mmm format
pub fn format_duration(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

fn program_name(command: &Command) -> String {
    command.get_program().to_string_lossy().to_string()
}

fn spawn(command: &mut Command) -> PipelineResult<Output> {
    command.output().map_err(|e| PipelineError::ExternalProcess {
        program: program_name(command),
        status: "failed to start".to_string(),
        stderr: e.to_string(),
    })
}

/// Keep the tail of long diagnostic output.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.trim().to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...{}", tail.trim())
}

fn check_status(command: &Command, output: &Output) -> PipelineResult<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(PipelineError::ExternalProcess {
        program: program_name(command),
        status: output.status.to_string(),
        stderr: tail(&stderr, 2000),
    })
}

/// Execute FFmpeg command with error handling
pub fn execute_ffmpeg_command(mut command: Command) -> PipelineResult<String> {
    tracing::debug!("Executing FFmpeg: {:?}", command);
    let output = spawn(&mut command)?;
    check_status(&command, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Execute FFprobe for media analysis
pub fn execute_ffprobe_command(ffprobe: &str, args: &[&str]) -> PipelineResult<String> {
    let mut command = Command::new(ffprobe);
    command.args(args);
    let output = spawn(&mut command)?;
    check_status(&command, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a command, writing its stdout and stderr to `log_path` whatever the
/// outcome.
pub fn execute_logged_command(mut command: Command, log_path: &Path) -> PipelineResult<()> {
    tracing::debug!("Executing: {:?}", command);
    let output = spawn(&mut command)?;
    ensure_output_directory(log_path)?;
    let mut log = format!("$ {:?}\n\n--- stdout ---\n", command);
    log.push_str(&String::from_utf8_lossy(&output.stdout));
    log.push_str("\n--- stderr ---\n");
    log.push_str(&String::from_utf8_lossy(&output.stderr));
    fs::write(log_path, log)?;
    check_status(&command, &output)
}

/// Check if an executable answers `-version` (or `--version`)
pub fn check_tool_available(program: &str, version_flag: &str) -> PipelineResult<()> {
    let mut command = Command::new(program);
    command.arg(version_flag);
    spawn(&mut command).map(|_| ())
}

/// Create the parent directory of an output file
pub fn ensure_output_directory(file_path: &Path) -> PipelineResult<()> {
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn file_size_mb(path: &Path) -> f64 {
    fs::metadata(path)
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}
