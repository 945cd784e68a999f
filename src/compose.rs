// src/compose.rs
//! Scene composition and final concatenation.
//!
//! The audio track is authoritative: every composed scene lasts exactly as
//! long as its narration. A short animation has its last frame held, a long
//! one is cut. Filter graphs are built as typed values and only rendered to
//! ffmpeg syntax when the command line is assembled.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::core::{FfmpegTools, MediaProbe};
use crate::error::{PipelineError, PipelineResult};
use crate::scene_id::SceneId;
use crate::store::ArtifactStore;
use crate::subtitle::SubtitleStyle;
use crate::utils::{execute_ffmpeg_command, file_size_mb, format_duration};

// ============================================================================
// FILTER GRAPH
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Scale to fit inside the canvas, keeping aspect ratio.
    ScaleFit { width: u32, height: u32 },
    /// Letterbox to the canvas, content centred.
    PadCenter { width: u32, height: u32 },
    PixelFormat(&'static str),
    /// Clone the last frame for `seconds` after the stream ends.
    HoldLastFrame { seconds: f64 },
    /// Centre the second input over the first; keep the last overlay frame
    /// after it ends.
    OverlayCenter,
    Subtitles { path: PathBuf, force_style: String },
}

/// Quote a value for a filter option, escaping embedded single quotes.
fn quote_filter_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "/").replace('\'', "'\\''"))
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::ScaleFit { width, height } => write!(
                f,
                "scale={}:{}:force_original_aspect_ratio=decrease",
                width, height
            ),
            Filter::PadCenter { width, height } => {
                write!(f, "pad={}:{}:(ow-iw)/2:(oh-ih)/2", width, height)
            }
            Filter::PixelFormat(format) => write!(f, "format={}", format),
            Filter::HoldLastFrame { seconds } => {
                write!(f, "tpad=stop_mode=clone:stop_duration={:.3}", seconds)
            }
            Filter::OverlayCenter => write!(f, "overlay=(W-w)/2:(H-h)/2:eof_action=repeat"),
            Filter::Subtitles { path, force_style } => write!(
                f,
                "subtitles=filename={}:force_style={}",
                quote_filter_value(&path.to_string_lossy()),
                quote_filter_value(force_style)
            ),
        }
    }
}

/// One `[in..]f1,f2,..[out]` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    pub inputs: Vec<String>,
    pub filters: Vec<Filter>,
    pub output: String,
}

impl FilterChain {
    pub fn new(inputs: &[&str], output: &str) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            filters: Vec::new(),
            output: output.to_string(),
        }
    }

    pub fn then(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn then_if(self, condition: bool, filter: impl FnOnce() -> Filter) -> Self {
        if condition {
            self.then(filter())
        } else {
            self
        }
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            write!(f, "[{}]", input)?;
        }
        let filters: Vec<String> = self.filters.iter().map(|x| x.to_string()).collect();
        write!(f, "{}[{}]", filters.join(","), self.output)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterGraph {
    pub chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn push(&mut self, chain: FilterChain) {
        self.chains.push(chain);
    }

    pub fn has_filter(&self, predicate: impl Fn(&Filter) -> bool) -> bool {
        self.chains.iter().flat_map(|c| c.filters.iter()).any(predicate)
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains: Vec<String> = self.chains.iter().map(|c| c.to_string()).collect();
        f.write_str(&chains.join(";"))
    }
}

// ============================================================================
// SCENE COMPOSITION
// ============================================================================

/// Files feeding one scene composition.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeInputs {
    pub scene: SceneId,
    pub animation: PathBuf,
    pub audio: PathBuf,
    pub background: Option<PathBuf>,
    pub subtitles: Option<PathBuf>,
    pub output: PathBuf,
}

/// Timing decisions for one scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePlan {
    /// Output length; always the audio length.
    pub duration: f64,
    pub animation_duration: f64,
    /// Seconds the last animation frame is frozen for.
    pub hold_seconds: f64,
}

impl ScenePlan {
    pub fn new(audio_duration: f64, animation_duration: f64) -> Self {
        Self {
            duration: audio_duration,
            animation_duration,
            hold_seconds: (audio_duration - animation_duration).max(0.0),
        }
    }
}

/// Fully built compositor invocation.
#[derive(Debug, Clone)]
pub struct ComposeCommand {
    pub program: String,
    pub args: Vec<String>,
    pub graph: FilterGraph,
}

impl ComposeCommand {
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

#[derive(Debug, Clone)]
pub struct ComposedScene {
    pub scene: SceneId,
    pub path: PathBuf,
    pub duration: f64,
    pub degraded: Vec<String>,
}

// ============================================================================
// FINAL CONCATENATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatEntry {
    pub scene: SceneId,
    pub path: PathBuf,
    pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcatPlan {
    /// Composed clips in canonical scene order.
    pub entries: Vec<ConcatEntry>,
    /// Scenes without a composed clip.
    pub missing: Vec<SceneId>,
    pub expected_duration: f64,
}

#[derive(Debug, Clone)]
pub struct FinalReport {
    pub output: PathBuf,
    pub included: Vec<SceneId>,
    pub missing: Vec<SceneId>,
    pub total_duration: f64,
    pub size_mb: f64,
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Final video: {}", self.output.display())?;
        writeln!(
            f,
            "  {} scene(s), {} ({:.1} MB)",
            self.included.len(),
            format_duration(self.total_duration),
            self.size_mb
        )?;
        if !self.missing.is_empty() {
            let ids: Vec<String> = self.missing.iter().map(|s| s.to_string()).collect();
            write!(f, "  MISSING: {}", ids.join(", "))?;
        }
        Ok(())
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct CompositionEngine {
    tools: FfmpegTools,
    probe: Arc<dyn MediaProbe>,
    canvas: (u32, u32),
    style: SubtitleStyle,
}

impl CompositionEngine {
    pub fn new(tools: FfmpegTools, canvas: (u32, u32)) -> Self {
        let probe: Arc<dyn MediaProbe> = Arc::new(tools.clone());
        Self {
            tools,
            probe,
            canvas,
            style: SubtitleStyle::default(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Locate a scene's inputs. Animation and audio are required; background
    /// and subtitles are optional and only logged when absent.
    pub fn gather_inputs(
        &self,
        store: &ArtifactStore,
        scene: &SceneId,
    ) -> PipelineResult<(ComposeInputs, Vec<String>)> {
        let animation = store.rendered_clip(scene).ok_or_else(|| PipelineError::MissingArtifact {
            scene: scene.clone(),
            kind: "rendered animation",
            path: store.render_target(scene, "mov"),
        })?;

        let audio = store.audio_path(scene);
        if !audio.is_file() {
            return Err(PipelineError::MissingArtifact {
                scene: scene.clone(),
                kind: "narration audio",
                path: audio,
            });
        }

        let mut degraded = Vec::new();
        let background = store.background(scene);
        match &background {
            None => {
                let note = PipelineError::DegradedInput {
                    scene: scene.clone(),
                    detail: "no background image, animation only".into(),
                };
                tracing::warn!("⚠️ {}", note);
                degraded.push(note.to_string());
            }
            Some(_) if !is_transparent_clip(&animation) => {
                let note = PipelineError::DegradedInput {
                    scene: scene.clone(),
                    detail: "animation has no alpha channel, background will be covered".into(),
                };
                tracing::warn!("⚠️ {}", note);
                degraded.push(note.to_string());
            }
            Some(_) => {}
        }

        let subtitle_path = store.subtitle_path(scene);
        let subtitles = if subtitle_path.is_file() {
            Some(subtitle_path)
        } else {
            let note = PipelineError::DegradedInput {
                scene: scene.clone(),
                detail: "no subtitle file, composing without captions".into(),
            };
            tracing::warn!("⚠️ {}", note);
            degraded.push(note.to_string());
            None
        };

        Ok((
            ComposeInputs {
                scene: scene.clone(),
                animation,
                audio,
                background,
                subtitles,
                output: store.composed_path(scene),
            },
            degraded,
        ))
    }

    pub fn plan(&self, inputs: &ComposeInputs) -> PipelineResult<ScenePlan> {
        let audio_duration = self.probe.duration(&inputs.audio)?;
        if !(audio_duration > 0.0) {
            return Err(PipelineError::MissingArtifact {
                scene: inputs.scene.clone(),
                kind: "non-empty narration audio",
                path: inputs.audio.clone(),
            });
        }
        let animation_duration = self.probe.duration(&inputs.animation)?;
        Ok(ScenePlan::new(audio_duration, animation_duration))
    }

    pub fn build_filter_graph(&self, inputs: &ComposeInputs, plan: &ScenePlan) -> FilterGraph {
        let (width, height) = self.canvas;
        let hold = plan.hold_seconds > 0.0;
        let subtitles = inputs.subtitles.clone().map(|path| Filter::Subtitles {
            path,
            force_style: self.style.force_style(),
        });

        let mut graph = FilterGraph::default();
        match inputs.background {
            Some(_) => {
                graph.push(
                    FilterChain::new(&["0:v"], "bg")
                        .then(Filter::ScaleFit { width, height })
                        .then(Filter::PadCenter { width, height }),
                );
                graph.push(
                    FilterChain::new(&["1:v"], "fg")
                        .then(Filter::ScaleFit { width, height })
                        .then(Filter::PixelFormat("rgba"))
                        .then_if(hold, || Filter::HoldLastFrame {
                            seconds: plan.hold_seconds,
                        }),
                );
                let mut last = FilterChain::new(&["bg", "fg"], "outv").then(Filter::OverlayCenter);
                if let Some(sub) = subtitles {
                    last = last.then(sub);
                }
                graph.push(last.then(Filter::PixelFormat("yuv420p")));
            }
            None => {
                let mut chain = FilterChain::new(&["0:v"], "outv")
                    .then(Filter::ScaleFit { width, height })
                    .then(Filter::PadCenter { width, height })
                    .then_if(hold, || Filter::HoldLastFrame {
                        seconds: plan.hold_seconds,
                    });
                if let Some(sub) = subtitles {
                    chain = chain.then(sub);
                }
                graph.push(chain.then(Filter::PixelFormat("yuv420p")));
            }
        }
        graph
    }

    pub fn build_command(&self, inputs: &ComposeInputs, plan: &ScenePlan) -> ComposeCommand {
        let graph = self.build_filter_graph(inputs, plan);
        let mut args: Vec<String> = Vec::new();
        let mut next_input = 0;

        if let Some(background) = &inputs.background {
            for flag in ["-loop", "1", "-i"] {
                args.push(flag.to_string());
            }
            args.push(background.to_string_lossy().to_string());
            next_input += 1;
        }
        args.push("-i".into());
        args.push(inputs.animation.to_string_lossy().to_string());
        next_input += 1;
        args.push("-i".into());
        args.push(inputs.audio.to_string_lossy().to_string());
        let audio_index = next_input;

        args.push("-filter_complex".into());
        args.push(graph.to_string());
        args.push("-map".into());
        args.push("[outv]".into());
        args.push("-map".into());
        args.push(format!("{}:a:0", audio_index));
        for flag in ["-c:v", "libx264", "-preset", "fast", "-crf", "23"] {
            args.push(flag.into());
        }
        for flag in ["-c:a", "aac", "-b:a", "192k"] {
            args.push(flag.into());
        }
        args.push("-t".into());
        args.push(format!("{:.3}", plan.duration));
        args.push("-y".into());
        args.push(inputs.output.to_string_lossy().to_string());

        ComposeCommand {
            program: self.tools.ffmpeg.clone(),
            args,
            graph,
        }
    }

    /// Compose one scene. Blocking; callers run scenes one at a time.
    pub fn compose_scene(
        &self,
        store: &ArtifactStore,
        scene: &SceneId,
    ) -> PipelineResult<ComposedScene> {
        // A clip left from an earlier run must not outlive a failed recompose.
        let previous = store.composed_path(scene);
        if previous.is_file() {
            std::fs::remove_file(&previous)?;
        }
        let (inputs, degraded) = self.gather_inputs(store, scene)?;
        let plan = self.plan(&inputs)?;
        tracing::info!(
            "🎬 Composing {}: audio {:.2}s, animation {:.2}s, hold {:.2}s",
            scene,
            plan.duration,
            plan.animation_duration,
            plan.hold_seconds
        );

        crate::utils::ensure_output_directory(&inputs.output)?;
        let command = self.build_command(&inputs, &plan);
        if let Err(e) = execute_ffmpeg_command(command.to_command()) {
            std::fs::remove_file(&inputs.output).ok();
            return Err(e);
        }

        Ok(ComposedScene {
            scene: scene.clone(),
            path: inputs.output,
            duration: plan.duration,
            degraded,
        })
    }

    /// Order the composed clips canonically and note the gaps.
    pub fn plan_concat(&self, store: &ArtifactStore, scene_ids: &[SceneId]) -> ConcatPlan {
        let mut ids = scene_ids.to_vec();
        ids.sort();

        let mut plan = ConcatPlan::default();
        for scene in ids {
            let path = store.composed_path(&scene);
            if !path.is_file() {
                plan.missing.push(scene);
                continue;
            }
            let duration = match self.probe.duration(&path) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("⚠️ Could not probe {}: {}", path.display(), e);
                    0.0
                }
            };
            plan.expected_duration += duration;
            plan.entries.push(ConcatEntry {
                scene,
                path,
                duration,
            });
        }
        plan
    }

    /// Stream-copy every composed clip into the final video.
    pub fn concat_final(
        &self,
        store: &ArtifactStore,
        scene_ids: &[SceneId],
    ) -> PipelineResult<FinalReport> {
        let plan = self.plan_concat(store, scene_ids);
        if plan.entries.is_empty() {
            return Err(PipelineError::InvalidInput(
                "no composed scenes to concatenate".into(),
            ));
        }
        if !plan.missing.is_empty() {
            let ids: Vec<String> = plan.missing.iter().map(|s| s.to_string()).collect();
            tracing::warn!("⚠️ Final video will be missing: {}", ids.join(", "));
        }

        let output = store.final_path();
        let inputs: Vec<PathBuf> = plan.entries.iter().map(|e| e.path.clone()).collect();
        self.tools.concat_stream_copy(&inputs, &output)?;

        let total_duration = self
            .probe
            .duration(&output)
            .unwrap_or(plan.expected_duration);
        let report = FinalReport {
            size_mb: file_size_mb(&output),
            output,
            included: plan.entries.into_iter().map(|e| e.scene).collect(),
            missing: plan.missing,
            total_duration,
        };
        tracing::info!(
            "✅ Final video: {} scene(s), {:.1}s, {:.1} MB",
            report.included.len(),
            report.total_duration,
            report.size_mb
        );
        Ok(report)
    }
}

/// Alpha clips are rendered as `.mov`.
pub fn is_transparent_clip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mov"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    /// Durations keyed by file name.
    struct FixedProbe(HashMap<String, f64>);

    impl FixedProbe {
        fn new(pairs: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self(
                pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ))
        }
    }

    impl MediaProbe for FixedProbe {
        fn duration(&self, path: &Path) -> PipelineResult<f64> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            self.0.get(name).copied().ok_or_else(|| PipelineError::ExternalProcess {
                program: "probe".into(),
                status: "1".into(),
                stderr: format!("unknown {}", name),
            })
        }
    }

    fn store_with(dir: &Path) -> ArtifactStore {
        let store = ArtifactStore::new(dir, "P1");
        store.create_layout().unwrap();
        store
    }

    fn engine(probe: Arc<dyn MediaProbe>) -> CompositionEngine {
        CompositionEngine::new(FfmpegTools::default(), (1920, 1080)).with_probe(probe)
    }

    #[test]
    fn test_short_animation_holds_last_frame_to_audio_length() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path());
        let s1 = SceneId::from("s1");
        fs::write(store.render_target(&s1, "mov"), b"anim").unwrap();
        fs::write(store.audio_path(&s1), b"audio").unwrap();
        fs::write(store.backgrounds_dir().join("s1_bg.png"), b"bg").unwrap();
        fs::write(store.subtitle_path(&s1), "1\n00:00:00,000 --> 00:00:05,000\nhi\n").unwrap();

        let engine = engine(FixedProbe::new(&[("s1.mov", 3.0), ("s1_audio.mp3", 5.0)]));
        let (inputs, degraded) = engine.gather_inputs(&store, &s1).unwrap();
        assert!(degraded.is_empty());

        let plan = engine.plan(&inputs).unwrap();
        assert_eq!(plan.duration, 5.0);
        assert_eq!(plan.hold_seconds, 2.0);

        let command = engine.build_command(&inputs, &plan);
        let t = command.args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(command.args[t + 1], "5.000");
        assert!(command
            .graph
            .has_filter(|f| *f == Filter::HoldLastFrame { seconds: 2.0 }));
        assert!(command.graph.to_string().contains("tpad=stop_mode=clone:stop_duration=2.000"));
        assert_eq!(&command.args[..3], &["-loop", "1", "-i"]);
        let audio_map = command.args.iter().position(|a| a == "2:a:0");
        assert!(audio_map.is_some());
    }

    #[test]
    fn test_long_animation_is_trimmed_without_hold() {
        let plan = ScenePlan::new(4.0, 9.5);
        assert_eq!(plan.duration, 4.0);
        assert_eq!(plan.hold_seconds, 0.0);

        let inputs = ComposeInputs {
            scene: SceneId::from("s2"),
            animation: PathBuf::from("s2.mp4"),
            audio: PathBuf::from("s2_audio.mp3"),
            background: None,
            subtitles: None,
            output: PathBuf::from("s2_final.mp4"),
        };
        let engine = engine(FixedProbe::new(&[]));
        let command = engine.build_command(&inputs, &plan);
        assert!(!command.graph.has_filter(|f| matches!(f, Filter::HoldLastFrame { .. })));
        assert_eq!(
            command.graph.to_string(),
            "[0:v]scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2,format=yuv420p[outv]"
        );
        assert!(command.args.contains(&"1:a:0".to_string()));
        assert!(!command.args.contains(&"-loop".to_string()));
    }

    #[test]
    fn test_background_overlay_graph() {
        let inputs = ComposeInputs {
            scene: SceneId::from("s1"),
            animation: PathBuf::from("s1.mov"),
            audio: PathBuf::from("s1_audio.mp3"),
            background: Some(PathBuf::from("s1_bg.png")),
            subtitles: None,
            output: PathBuf::from("s1_final.mp4"),
        };
        let engine = engine(FixedProbe::new(&[]));
        let graph = engine.build_filter_graph(&inputs, &ScenePlan::new(5.0, 5.0));
        assert_eq!(
            graph.to_string(),
            "[0:v]scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2[bg];\
[1:v]scale=1920:1080:force_original_aspect_ratio=decrease,format=rgba[fg];\
[bg][fg]overlay=(W-w)/2:(H-h)/2:eof_action=repeat,format=yuv420p[outv]"
        );
    }

    #[test]
    fn test_missing_required_inputs_are_hard_failures() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path());
        let s1 = SceneId::from("s1");
        let engine = engine(FixedProbe::new(&[]));

        let err = engine.gather_inputs(&store, &s1).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { kind: "rendered animation", .. }));

        fs::write(store.render_target(&s1, "mp4"), b"anim").unwrap();
        let err = engine.gather_inputs(&store, &s1).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { kind: "narration audio", .. }));

        fs::write(store.audio_path(&s1), b"audio").unwrap();
        let (inputs, degraded) = engine.gather_inputs(&store, &s1).unwrap();
        assert!(inputs.background.is_none());
        assert!(inputs.subtitles.is_none());
        assert_eq!(degraded.len(), 2);
    }

    #[test]
    fn test_concat_plan_uses_canonical_order_and_reports_gaps() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path());
        // Written out of order on purpose.
        for id in ["s10", "s1", "s2"] {
            fs::write(store.composed_path(&SceneId::from(id)), id).unwrap();
        }
        let probe = FixedProbe::new(&[
            ("s1_final.mp4", 2.0),
            ("s2_final.mp4", 3.0),
            ("s10_final.mp4", 4.0),
        ]);
        let engine = engine(probe);
        let ids: Vec<SceneId> = ["s2", "s10", "s3", "s1"].iter().map(|s| SceneId::from(*s)).collect();
        let plan = engine.plan_concat(&store, &ids);

        let order: Vec<&str> = plan.entries.iter().map(|e| e.scene.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2", "s10"]);
        assert!((plan.expected_duration - 9.0).abs() < 1e-9);
        assert_eq!(plan.missing, vec![SceneId::from("s3")]);
    }

    #[test]
    fn test_subtitle_filter_quotes_values() {
        let filter = Filter::Subtitles {
            path: PathBuf::from("out/it's/s1.srt"),
            force_style: "FontSize=20,MarginV=15".into(),
        };
        assert_eq!(
            filter.to_string(),
            "subtitles=filename='out/it'\\''s/s1.srt':force_style='FontSize=20,MarginV=15'"
        );
    }

    #[test]
    fn test_opaque_clip_over_background_is_degraded() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path());
        let s1 = SceneId::from("s1");
        fs::write(store.render_target(&s1, "mp4"), b"anim").unwrap();
        fs::write(store.audio_path(&s1), b"audio").unwrap();
        fs::write(store.backgrounds_dir().join("s1_bg.png"), b"bg").unwrap();
        fs::write(store.subtitle_path(&s1), "1\n00:00:00,000 --> 00:00:01,000\nhi\n").unwrap();

        let engine = engine(FixedProbe::new(&[]));
        let (_, degraded) = engine.gather_inputs(&store, &s1).unwrap();
        assert_eq!(degraded.len(), 1);
        assert!(degraded[0].contains("alpha"));
        assert!(is_transparent_clip(Path::new("8_renders/s1.mov")));
    }

    #[test]
    fn test_failed_recompose_drops_stale_clip_from_concat() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path());
        let s1 = SceneId::from("s1");
        let s2 = SceneId::from("s2");
        fs::write(store.composed_path(&s1), b"old run").unwrap();
        fs::write(store.composed_path(&s2), b"s2").unwrap();
        let engine = engine(FixedProbe::new(&[("s2_final.mp4", 3.0)]));

        // s1 has lost its render, so composition fails before ffmpeg runs.
        let err = engine.compose_scene(&store, &s1).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { .. }));
        assert!(!store.composed_path(&s1).exists());

        let plan = engine.plan_concat(&store, &[s1.clone(), s2.clone()]);
        let included: Vec<&str> = plan.entries.iter().map(|e| e.scene.as_str()).collect();
        assert_eq!(included, vec!["s2"]);
        assert_eq!(plan.missing, vec![s1]);
    }
}
