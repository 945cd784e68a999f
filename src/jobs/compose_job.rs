// src/jobs/compose_job.rs
//! Scene composition batch followed by the final concatenation.
//! Compositor runs are sequential.

use super::{BatchReport, SceneOutcome};
use crate::compose::{CompositionEngine, FinalReport};
use crate::error::PipelineResult;
use crate::scene_id::SceneId;
use crate::store::ArtifactStore;
use crate::workflow::PhaseStateMachine;

#[derive(Debug, Clone)]
pub struct ComposeSummary {
    pub report: BatchReport,
    pub final_video: Option<FinalReport>,
}

fn compose_into(
    engine: &CompositionEngine,
    store: &ArtifactStore,
    scene: &SceneId,
    report: &mut BatchReport,
) {
    match engine.compose_scene(store, scene) {
        Ok(composed) => report.record(
            scene,
            &SceneOutcome::Succeeded {
                duration_seconds: composed.duration,
            },
        ),
        Err(e) => {
            tracing::error!("❌ {} composition failed: {}", scene, e);
            report.record(scene, &SceneOutcome::Failed { error: e.to_string() });
        }
    }
}

/// Scenes whose composed clip belongs in the final video: composed in this
/// run, or skipped because an earlier run already composed them.
fn concat_candidates(scene_ids: &[SceneId], report: &BatchReport) -> Vec<SceneId> {
    scene_ids
        .iter()
        .filter(|s| report.succeeded.contains(s) || report.skipped.contains(s))
        .cloned()
        .collect()
}

/// Compose every scene (skipping finished ones unless `force`), then build
/// the final video. The project completes only when no scene is missing.
pub fn compose_all(
    machine: &mut PhaseStateMachine,
    engine: &CompositionEngine,
    force: bool,
) -> PipelineResult<ComposeSummary> {
    let store = machine.store()?;
    let scene_ids = store.load_scenes()?.scene_ids();
    let mut report = BatchReport::new("compose-all");

    for (i, scene) in scene_ids.iter().enumerate() {
        if !force && store.composed_path(scene).is_file() {
            tracing::info!("⏭️ [{}/{}] {} already composed", i + 1, scene_ids.len(), scene);
            report.skipped.push(scene.clone());
            continue;
        }
        tracing::info!("[{}/{}] {}", i + 1, scene_ids.len(), scene);
        compose_into(engine, &store, scene, &mut report);
    }

    if report.succeeded.is_empty() && report.skipped.is_empty() {
        report.stopped_reason = Some("no scene could be composed".into());
        report.next_command = report
            .failed
            .first()
            .map(|(scene, _)| format!("compose --scene {}", scene));
        return Ok(ComposeSummary {
            report,
            final_video: None,
        });
    }

    let mut final_video = engine.concat_final(&store, &concat_candidates(&scene_ids, &report))?;
    for (scene, _) in &report.failed {
        if !final_video.missing.contains(scene) {
            final_video.missing.push(scene.clone());
        }
    }
    final_video.missing.sort();
    report.total_duration = final_video.total_duration;

    if final_video.missing.is_empty() && report.failed.is_empty() {
        machine.complete(&final_video.output)?;
        report.next_command = None;
    } else {
        let retry = final_video
            .missing
            .first()
            .or_else(|| report.failed.first().map(|(scene, _)| scene))
            .map(|scene| format!("compose --scene {}", scene));
        report.next_command = retry;
    }

    Ok(ComposeSummary {
        report,
        final_video: Some(final_video),
    })
}

/// Compose a single scene, e.g. to retry one reported as missing.
pub fn compose_one(
    machine: &mut PhaseStateMachine,
    engine: &CompositionEngine,
    scene: &SceneId,
) -> PipelineResult<BatchReport> {
    let store = machine.store()?;
    let mut report = BatchReport::new("compose");
    compose_into(engine, &store, scene, &mut report);
    report.next_command = if report.failed.is_empty() {
        Some("compose-all".into())
    } else {
        Some(format!("compose --scene {}", scene))
    };
    Ok(report)
}
