use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use math_video_maker::asset_catalog::{AssetCatalog, SupabaseStorage};
use math_video_maker::compose::CompositionEngine;
use math_video_maker::config::{PipelineConfig, TtsProvider};
use math_video_maker::core::{FfmpegTools, FfprobeAudioProbe};
use math_video_maker::elevenlabs_client::ElevenLabsClient;
use math_video_maker::google_tts_client::GoogleTtsClient;
use math_video_maker::jobs::compose_job::{compose_all, compose_one};
use math_video_maker::jobs::tts_job::BatchRunner;
use math_video_maker::render::{AnimationRenderer, RenderQuality};
use math_video_maker::services::retry::RetryPolicy;
use math_video_maker::services::SpeechSynthesizer;
use math_video_maker::utils::check_tool_available;
use math_video_maker::whisper_client::WhisperClient;
use math_video_maker::workflow::PhaseStateMachine;
use math_video_maker::{AspectRatio, PipelineError, PipelineResult, ProjectSettings, SceneId};

#[derive(Parser, Debug)]
#[command(
    name = "math-video-maker",
    version,
    about = "Resumable production pipeline for narrated math explainer videos"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new project and create its folder tree
    Init {
        #[arg(long)]
        title: String,
        #[arg(long)]
        style: Option<String>,
        #[arg(long)]
        difficulty: Option<String>,
        /// Target length in seconds
        #[arg(long)]
        duration: Option<u32>,
        /// 16:9, 9:16 or 1:1
        #[arg(long)]
        aspect_ratio: Option<String>,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        subtitle_style: Option<String>,
    },
    /// Show the project state and the next command
    Status,
    /// Print only the resume point
    Resume,
    ApproveScript,
    /// Approve the scene list in 2_scenes/scenes.json
    ApproveScenes,
    /// Synthesize one scene (retry after a failure)
    Tts {
        #[arg(long)]
        scene: String,
        #[arg(long)]
        voice: Option<String>,
    },
    /// Synthesize every scene, optionally resuming at a 1-based index
    TtsAll {
        #[arg(long = "from", default_value_t = 1)]
        from: usize,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        voice: Option<String>,
    },
    /// Mark a scene's animation source as written
    SceneDone {
        #[arg(long)]
        scene: String,
        #[arg(long)]
        file: PathBuf,
    },
    Render {
        #[arg(long)]
        scene: String,
        #[arg(long, value_enum, default_value_t = RenderQuality::Low)]
        quality: RenderQuality,
        /// Render without an alpha channel (`.mp4`)
        #[arg(long)]
        opaque: bool,
    },
    RenderAll {
        #[arg(long, value_enum, default_value_t = RenderQuality::Low)]
        quality: RenderQuality,
        #[arg(long)]
        opaque: bool,
    },
    Compose {
        #[arg(long)]
        scene: String,
    },
    ComposeAll {
        /// Recompose scenes that already have a composed clip
        #[arg(long)]
        force: bool,
    },
    /// Copy background images into 9_backgrounds
    ImportImages {
        #[arg(long)]
        source: PathBuf,
    },
    CheckImages,
    /// Diff the local assets folder against the remote bucket and sync
    SyncAssets {
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn active_project(machine: &mut PhaseStateMachine) -> PipelineResult<String> {
    machine
        .record()
        .project_id
        .clone()
        .ok_or(PipelineError::NoActiveProject)
}

fn build_synthesizer(config: &PipelineConfig) -> PipelineResult<Arc<dyn SpeechSynthesizer>> {
    match config.tts_provider {
        TtsProvider::Google => {
            let key = config.google_tts_api_key.clone().ok_or_else(|| {
                PipelineError::Config("GOOGLE_TTS_API_KEY is required for the google provider".into())
            })?;
            Ok(Arc::new(GoogleTtsClient::new(key, config.google_tts_language.clone())))
        }
        TtsProvider::ElevenLabs => {
            let key = config.elevenlabs_api_key.clone().ok_or_else(|| {
                PipelineError::Config("ELEVENLABS_API_KEY is required for the elevenlabs provider".into())
            })?;
            Ok(Arc::new(ElevenLabsClient::new(key)))
        }
    }
}

fn build_runner(config: &PipelineConfig, workers: Option<usize>) -> PipelineResult<BatchRunner> {
    let synthesizer = build_synthesizer(config)?;
    let probe = Arc::new(FfprobeAudioProbe::new(config.ffprobe_path.clone()));
    let mut runner = BatchRunner::new(synthesizer, probe)
        .with_policy(RetryPolicy::new(config.tts_max_attempts, config.tts_initial_backoff_ms))
        .with_workers(workers.unwrap_or(config.tts_workers));

    match &config.openai_api_key {
        Some(key) => {
            let language = config
                .google_tts_language
                .split('-')
                .next()
                .unwrap_or("ko")
                .to_string();
            runner = runner.with_transcriber(Arc::new(WhisperClient::new(key.clone()).with_language(language)));
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not found. Sentence timing falls back to equal distribution.");
        }
    }
    Ok(runner)
}

fn build_engine(config: &PipelineConfig, aspect_ratio: AspectRatio) -> CompositionEngine {
    let tools = FfmpegTools::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone());
    CompositionEngine::new(tools, aspect_ratio.canvas())
}

async fn run(command: Commands) -> PipelineResult<()> {
    let config = PipelineConfig::from_env()?;
    let mut machine = PhaseStateMachine::new(config.state_file.clone(), config.output_dir.clone());

    match command {
        Commands::Init {
            title,
            style,
            difficulty,
            duration,
            aspect_ratio,
            voice,
            subtitle_style,
        } => {
            let mut settings = ProjectSettings::default();
            if let Some(style) = style {
                settings.style = style;
            }
            if let Some(difficulty) = difficulty {
                settings.difficulty = difficulty;
            }
            if let Some(duration) = duration {
                settings.duration = duration;
            }
            if let Some(ratio) = aspect_ratio {
                settings.aspect_ratio = AspectRatio::parse(&ratio).ok_or_else(|| {
                    PipelineError::InvalidInput(format!("unsupported aspect ratio '{}'", ratio))
                })?;
            }
            if let Some(voice) = voice {
                settings.voice = voice;
            }
            if let Some(subtitle_style) = subtitle_style {
                settings.subtitle_style = subtitle_style;
            }
            machine.initialize(&title, settings)?;
            println!("{}", machine.status());
        }

        Commands::Status => println!("{}", machine.status()),

        Commands::Resume => println!("{}", machine.resume_point()),

        Commands::ApproveScript => {
            let project_id = active_project(&mut machine)?;
            machine.approve_script(&project_id)?;
            println!("{}", machine.resume_point());
        }

        Commands::ApproveScenes => {
            let project_id = active_project(&mut machine)?;
            let scene_ids = machine.store()?.load_scenes()?.scene_ids();
            machine.approve_scenes(&project_id, &scene_ids)?;
            println!("{}", machine.resume_point());
        }

        Commands::Tts { scene, voice } => {
            let store = machine.store()?;
            let scenes = store.load_scenes()?.canonical();
            let voice = voice.unwrap_or_else(|| machine.record().settings.voice.clone());
            let runner = build_runner(&config, None)?;
            let shared = machine.shared();
            let report = runner
                .run_scene(&shared, &scenes, &SceneId::from(scene), &voice)
                .await?;
            println!("{}", report);
        }

        Commands::TtsAll { from, workers, voice } => {
            let store = machine.store()?;
            let scenes = store.load_scenes()?.canonical();
            let voice = voice.unwrap_or_else(|| machine.record().settings.voice.clone());
            if workers == Some(0) {
                return Err(PipelineError::InvalidInput("--workers must be at least 1".into()));
            }
            let runner = build_runner(&config, workers)?;
            let shared = machine.shared();
            let report = runner.run_all(&shared, &scenes, &voice, from).await?;
            println!("{}", report);
        }

        Commands::SceneDone { scene, file } => {
            let scene = SceneId::from(scene);
            if !file.is_file() {
                return Err(PipelineError::MissingArtifact {
                    scene,
                    kind: "animation source",
                    path: file,
                });
            }
            if !machine.record().scene_roster.contains(&scene) {
                return Err(PipelineError::InvalidInput(format!("{} is not an approved scene", scene)));
            }
            let store = machine.store()?;
            let target = store.animation_source_path(&scene);
            if target != file {
                let code = std::fs::read_to_string(&file)?;
                store.save_animation_source(&scene, &code)?;
            }
            machine.complete_scene_code(&scene, &target)?;
            println!("{}", machine.resume_point());
        }

        Commands::Render { scene, quality, opaque } => {
            check_tool_available(&config.manim_path, "--version")?;
            let store = machine.store()?;
            let scene_ids = store.load_scenes()?.scene_ids();
            let renderer = AnimationRenderer::new(config.manim_path.clone(), store.root())
                .with_quality(quality)
                .with_transparency(!opaque);
            let report = renderer.render_one(&mut machine, &SceneId::from(scene), &scene_ids)?;
            println!("{}", report);
        }

        Commands::RenderAll { quality, opaque } => {
            check_tool_available(&config.manim_path, "--version")?;
            let store = machine.store()?;
            let scene_ids = store.load_scenes()?.scene_ids();
            let renderer = AnimationRenderer::new(config.manim_path.clone(), store.root())
                .with_quality(quality)
                .with_transparency(!opaque);
            let report = renderer.render_all(&mut machine, &scene_ids)?;
            println!("{}", report);
        }

        Commands::Compose { scene } => {
            check_tool_available(&config.ffmpeg_path, "-version")?;
            let engine = build_engine(&config, machine.record().settings.aspect_ratio);
            let report = compose_one(&mut machine, &engine, &SceneId::from(scene))?;
            println!("{}", report);
        }

        Commands::ComposeAll { force } => {
            check_tool_available(&config.ffmpeg_path, "-version")?;
            let engine = build_engine(&config, machine.record().settings.aspect_ratio);
            let summary = compose_all(&mut machine, &engine, force)?;
            if let Some(final_video) = &summary.final_video {
                println!("{}", final_video);
            }
            println!("{}", summary.report);
        }

        Commands::ImportImages { source } => {
            let store = machine.store()?;
            let scene_ids = store.load_scenes()?.scene_ids();
            let report = store.import_backgrounds(&source, &scene_ids)?;
            for (from, to) in &report.imported {
                println!("  {} -> {}", from.display(), to.display());
            }
            println!("imported {} image(s)", report.imported.len());
            if !report.unmatched_scenes.is_empty() {
                let ids: Vec<&str> = report.unmatched_scenes.iter().map(|s| s.as_str()).collect();
                println!("still without background: {}", ids.join(", "));
            }
        }

        Commands::CheckImages => {
            let store = machine.store()?;
            let scene_ids = store.load_scenes()?.scene_ids();
            let check = store.check_backgrounds(&scene_ids);
            for (scene, path) in &check.present {
                println!("  ✅ {} {}", scene, path.display());
            }
            for scene in &check.missing {
                println!("  ❌ {} (no background)", scene);
            }
            println!("{}/{} scene(s) have a background", check.present.len(), scene_ids.len());
        }

        Commands::SyncAssets { dry_run } => {
            let (url, key) = match (&config.supabase_url, &config.supabase_service_key) {
                (Some(url), Some(key)) => (url.clone(), key.clone()),
                _ => {
                    return Err(PipelineError::Config(
                        "SUPABASE_URL and SUPABASE_SERVICE_KEY are required for sync-assets".into(),
                    ))
                }
            };
            let remote = Arc::new(SupabaseStorage::new(&url, key, config.asset_bucket.clone()));
            let catalog = AssetCatalog::new(config.assets_dir.clone(), remote);
            if dry_run {
                print!("{}", catalog.plan().await?);
            } else {
                print!("{}", catalog.sync().await?);
            }
        }
    }
    Ok(())
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,math_video_maker=debug,reqwest=info,hyper=info".to_string()
        } else {
            "info,math_video_maker=info,reqwest=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // stdout carries reports; logs go to stderr
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_file(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::debug!("Version: {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
