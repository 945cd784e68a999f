// src/core.rs

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{PipelineError, PipelineResult};
use crate::services::AudioProbe;
use crate::types::*;
use crate::utils::{ensure_output_directory, execute_ffmpeg_command, execute_ffprobe_command};

/// Locations of the ffmpeg/ffprobe executables.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl FfmpegTools {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn ffmpeg_command(&self) -> Command {
        Command::new(&self.ffmpeg)
    }

    pub fn analyze_media(&self, file_path: &Path) -> PipelineResult<VideoMetadata> {
        let path_str = file_path.to_string_lossy();
        let args = &[
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            &*path_str,
        ];
        let ffprobe_output = execute_ffprobe_command(&self.ffprobe, args)?;
        parse_ffprobe_json(&path_str, &ffprobe_output)
    }

    pub fn get_media_duration(&self, file_path: &Path) -> PipelineResult<f64> {
        Ok(self.analyze_media(file_path)?.duration_seconds)
    }

    /// Concatenate clips in the given order without re-encoding.
    pub fn concat_stream_copy(&self, inputs: &[PathBuf], output_file: &Path) -> PipelineResult<()> {
        if inputs.is_empty() {
            return Err(PipelineError::InvalidInput("nothing to concatenate".into()));
        }
        ensure_output_directory(output_file)?;

        let concat_list = build_concat_list(inputs)?;
        let concat_file_path = output_file.with_extension(format!("{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&concat_file_path, concat_list)?;

        let mut command = self.ffmpeg_command();
        command
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(&concat_file_path)
            .arg("-c")
            .arg("copy")
            .arg("-y")
            .arg(output_file);

        let result = execute_ffmpeg_command(command);
        std::fs::remove_file(&concat_file_path).ok();
        result.map(|_| ())
    }
}

/// Concat demuxer list: one `file '<abs path>'` line per input.
pub fn build_concat_list(inputs: &[PathBuf]) -> PipelineResult<String> {
    let mut lines = Vec::with_capacity(inputs.len());
    for input in inputs {
        let absolute_path = std::fs::canonicalize(input)?;
        let escaped = absolute_path.to_string_lossy().replace('\'', "'\\''");
        lines.push(format!("file '{}'", escaped));
    }
    Ok(lines.join("\n"))
}

pub fn parse_ffprobe_json(file_path: &str, ffprobe_output: &str) -> PipelineResult<VideoMetadata> {
    let json: Value = serde_json::from_str(ffprobe_output)?;

    let format = &json["format"];
    let duration_seconds = format["duration"]
        .as_str()
        .unwrap_or("0")
        .parse::<f64>()
        .unwrap_or(0.0);
    let file_size_mb = format["size"]
        .as_str()
        .unwrap_or("0")
        .parse::<f64>()
        .unwrap_or(0.0)
        / (1024.0 * 1024.0);

    let mut metadata = VideoMetadata {
        file_path: file_path.to_string(),
        duration_seconds,
        width: 0,
        height: 0,
        fps: 0.0,
        has_audio: false,
        has_video: false,
        format: format["format_name"].as_str().unwrap_or("unknown").to_string(),
        file_size_mb,
    };

    if let Some(streams) = json["streams"].as_array() {
        for stream in streams {
            if stream["codec_type"] == "video" {
                metadata.has_video = true;
                metadata.width = stream["width"].as_u64().unwrap_or(0) as u32;
                metadata.height = stream["height"].as_u64().unwrap_or(0) as u32;
                let fps_str = stream["r_frame_rate"].as_str().unwrap_or("0/1");
                if let Some((num, den)) = fps_str.split_once('/') {
                    let num = num.parse::<f64>().unwrap_or(0.0);
                    let den = den.parse::<f64>().unwrap_or(1.0);
                    if den != 0.0 {
                        metadata.fps = num / den;
                    }
                }
            } else if stream["codec_type"] == "audio" {
                metadata.has_audio = true;
            }
        }
    }

    Ok(metadata)
}

/// Blocking duration lookup used by the composition steps.
pub trait MediaProbe: Send + Sync {
    fn duration(&self, path: &Path) -> PipelineResult<f64>;
}

impl MediaProbe for FfmpegTools {
    fn duration(&self, path: &Path) -> PipelineResult<f64> {
        self.get_media_duration(path)
    }
}

/// Audio duration through `ffprobe`, run on the async runtime.
#[derive(Debug, Clone)]
pub struct FfprobeAudioProbe {
    ffprobe: String,
}

impl FfprobeAudioProbe {
    pub fn new(ffprobe: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl AudioProbe for FfprobeAudioProbe {
    async fn duration(&self, audio_path: &Path) -> PipelineResult<f64> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(audio_path)
            .output()
            .await
            .map_err(|e| PipelineError::ExternalProcess {
                program: self.ffprobe.clone(),
                status: "failed to start".into(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PipelineError::ExternalProcess {
                program: self.ffprobe.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim().parse::<f64>().map_err(|_| PipelineError::ExternalProcess {
            program: self.ffprobe.clone(),
            status: "unparsable duration".into(),
            stderr: raw.trim().to_string(),
        })
    }
}
