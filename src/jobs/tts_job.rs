// src/jobs/tts_job.rs
//! Narration batch: synthesis, timing and subtitles for every scene.
//!
//! Scenes run in canonical order from a 1-based resume index, optionally a few
//! at a time. A quota signal cancels scenes not yet started; calls already in
//! flight finish and are persisted before the batch checkpoints with
//! `partial_tts`.

use chrono::Local;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{BatchReport, SceneOutcome};
use crate::error::{PipelineError, PipelineResult};
use crate::scene_id::SceneId;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::{AudioProbe, SpeechSynthesizer, Transcriber};
use crate::store::ArtifactStore;
use crate::subtitle::srt_from_timing;
use crate::timing::TimingResolver;
use crate::types::{AudioReference, Scene, TimingRecord};
use crate::workflow::{ArtifactCategory, Phase, SharedPhaseMachine};

pub struct BatchRunner {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    transcriber: Option<Arc<dyn Transcriber>>,
    probe: Arc<dyn AudioProbe>,
    resolver: TimingResolver,
    policy: RetryPolicy,
    workers: usize,
}

struct ScheduledResult {
    index: usize,
    scene: SceneId,
    outcome: SceneOutcome,
    batch_fatal: bool,
}

impl BatchRunner {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, probe: Arc<dyn AudioProbe>) -> Self {
        Self {
            synthesizer,
            transcriber: None,
            probe,
            resolver: TimingResolver::new(),
            policy: RetryPolicy::default(),
            workers: 1,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Synthesize every scene from `from_index` (1-based) onward.
    pub async fn run_all(
        &self,
        machine: &SharedPhaseMachine,
        scenes: &[Scene],
        voice: &str,
        from_index: usize,
    ) -> PipelineResult<BatchReport> {
        let store = {
            let mut machine = machine.lock().await;
            machine.ensure_narration_ready()?;
            machine.store()?
        };
        let project_id = store.project_id().to_string();

        let mut ordered = scenes.to_vec();
        ordered.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        if ordered.is_empty() {
            return Err(PipelineError::InvalidInput("scene list is empty".into()));
        }
        let total = ordered.len();
        let from = from_index.max(1);
        if from > total {
            return Err(PipelineError::InvalidInput(format!(
                "--from {} is past the last scene ({})",
                from, total
            )));
        }

        tracing::info!(
            "🎙️ Narration batch: {} scene(s), starting at #{}, {} worker(s), synthesizer {}",
            total,
            from,
            self.workers,
            self.synthesizer.name()
        );

        let mut report = BatchReport::new("tts-all");
        let mut audio_paths: Vec<PathBuf> = Vec::new();

        for scene in &ordered[..from - 1] {
            let id = &scene.scene_id;
            match store.load_timing(id) {
                Ok(Some(timing)) => {
                    report.record(
                        id,
                        &SceneOutcome::Reused {
                            duration_seconds: timing.total_duration,
                        },
                    );
                    let audio = store.audio_path(id);
                    if audio.is_file() {
                        audio_paths.push(audio);
                    }
                }
                Ok(None) => {
                    tracing::warn!("⚠️ {} is before the resume point but has no timing", id);
                    report.skipped.push(id.clone());
                }
                Err(e) => {
                    tracing::warn!("⚠️ {} timing unreadable: {}", id, e);
                    report.skipped.push(id.clone());
                }
            }
        }

        let cancel = CancellationToken::new();
        let store_ref = &store;
        let results: Vec<ScheduledResult> = stream::iter(ordered.iter().enumerate().skip(from - 1))
            .map(move |(i, scene)| {
                let cancel = cancel.clone();
                async move {
                    let index = i + 1;
                    let id = scene.scene_id.clone();
                    if cancel.is_cancelled() {
                        return ScheduledResult {
                            index,
                            scene: id,
                            outcome: SceneOutcome::Cancelled,
                            batch_fatal: false,
                        };
                    }
                    match self
                        .process_scene(machine, store_ref, scene, voice, index, total)
                        .await
                    {
                        Ok(duration) => ScheduledResult {
                            index,
                            scene: id,
                            outcome: SceneOutcome::Succeeded {
                                duration_seconds: duration,
                            },
                            batch_fatal: false,
                        },
                        Err(e) => {
                            let batch_fatal = e.is_batch_fatal();
                            if batch_fatal {
                                cancel.cancel();
                                tracing::error!("🛑 {} hit the service quota, stopping batch: {}", id, e);
                            } else {
                                tracing::error!("❌ {} failed: {}", id, e);
                            }
                            ScheduledResult {
                                index,
                                scene: id,
                                outcome: SceneOutcome::Failed {
                                    error: e.to_string(),
                                },
                                batch_fatal,
                            }
                        }
                    }
                }
            })
            .buffered(self.workers)
            .collect()
            .await;

        let mut resume_index: Option<usize> = None;
        for result in &results {
            report.record(&result.scene, &result.outcome);
            if matches!(result.outcome, SceneOutcome::Succeeded { .. }) {
                audio_paths.push(store.audio_path(&result.scene));
            }
            let unfinished = result.batch_fatal || result.outcome == SceneOutcome::Cancelled;
            if unfinished && resume_index.is_none() {
                resume_index = Some(result.index);
            }
        }

        let mut machine = machine.lock().await;
        if let Some(resume) = resume_index {
            report.stopped_reason = Some(format!("service quota exhausted at scene #{}", resume));
            machine.partial_tts(&project_id, &audio_paths, resume)?;
            report.next_command = Some(format!("tts-all --from {}", resume));
        } else if let Some((first_failed, _)) = report.failed.first() {
            report.next_command = Some(format!("tts --scene {}", first_failed));
        } else if let Some(first_skipped) = report.skipped.first() {
            report.next_command = Some(format!("tts --scene {}", first_skipped));
        } else {
            machine.complete_tts(&project_id, &audio_paths)?;
            report.next_command = machine.resume_point().command;
        }

        tracing::info!(
            "🎙️ Narration batch done: {} ok, {} reused, {} failed, {} cancelled",
            report.succeeded.len(),
            report.reused.len(),
            report.failed.len(),
            report.cancelled.len()
        );
        Ok(report)
    }

    /// Re-run a single scene; completes the stage once every scene has timing.
    pub async fn run_scene(
        &self,
        machine: &SharedPhaseMachine,
        scenes: &[Scene],
        scene_id: &SceneId,
        voice: &str,
    ) -> PipelineResult<BatchReport> {
        let store = {
            let mut machine = machine.lock().await;
            machine.ensure_narration_ready()?;
            machine.store()?
        };
        let project_id = store.project_id().to_string();

        let mut ordered = scenes.to_vec();
        ordered.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        let position = ordered
            .iter()
            .position(|s| &s.scene_id == scene_id)
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown scene {}", scene_id)))?;

        let mut report = BatchReport::new("tts");
        let result = self
            .process_scene(machine, &store, &ordered[position], voice, position + 1, ordered.len())
            .await;
        match result {
            Ok(duration) => report.record(
                scene_id,
                &SceneOutcome::Succeeded {
                    duration_seconds: duration,
                },
            ),
            Err(e) if e.is_batch_fatal() => {
                report.record(scene_id, &SceneOutcome::Failed { error: e.to_string() });
                report.stopped_reason = Some("service quota exhausted".into());
                report.next_command = Some(format!("tts --scene {}", scene_id));
                return Ok(report);
            }
            Err(e) => {
                report.record(scene_id, &SceneOutcome::Failed { error: e.to_string() });
                report.next_command = Some(format!("tts --scene {}", scene_id));
                return Ok(report);
            }
        }

        let mut machine = machine.lock().await;
        let phase = machine.record().current_phase;
        let all_timed = ordered.iter().all(|s| store.timing_path(&s.scene_id).is_file());
        if all_timed && matches!(phase, Phase::ScenesApproved | Phase::TtsPartial) {
            let audio: Vec<PathBuf> = ordered
                .iter()
                .map(|s| store.audio_path(&s.scene_id))
                .filter(|p| p.is_file())
                .collect();
            machine.complete_tts(&project_id, &audio)?;
        }
        report.next_command = machine.resume_point().command;
        Ok(report)
    }

    /// Synthesize, time and persist one scene. Returns the audio duration.
    async fn process_scene(
        &self,
        machine: &SharedPhaseMachine,
        store: &ArtifactStore,
        scene: &Scene,
        voice: &str,
        index: usize,
        total: usize,
    ) -> PipelineResult<f64> {
        let id = &scene.scene_id;
        let text = scene.spoken_text().trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidInput(format!("{} has no narration", id)));
        }

        tracing::info!("🎙️ [{}/{}] {}: synthesizing {} chars", index, total, id, text.chars().count());
        let label = format!("synthesize {}", id);
        let audio = with_retry(&self.policy, &label, || self.synthesizer.synthesize(text, voice)).await?;
        let audio_path = store.save_audio(id, &audio)?;

        let transcript = match &self.transcriber {
            Some(transcriber) => {
                let label = format!("transcribe {}", id);
                match with_retry(&self.policy, &label, || transcriber.transcribe(&audio_path)).await {
                    Ok(transcript) => Some(transcript),
                    Err(e) => {
                        tracing::warn!("⚠️ {} transcription unavailable, splitting evenly: {}", id, e);
                        None
                    }
                }
            }
            None => None,
        };

        let duration = match self.probe.duration(&audio_path).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("⚠️ {} probe failed: {}", id, e);
                transcript.as_ref().and_then(|t| t.duration).ok_or(e)?
            }
        };

        let resolved = self.resolver.resolve(
            scene.subtitle_text(),
            duration,
            transcript.as_ref().map(|t| t.segments.as_slice()),
        );
        let timing = TimingRecord {
            scene_id: id.clone(),
            total_duration: duration,
            sentences: resolved.sentences,
            audio_reference: AudioReference::Single(audio_path.clone()),
            transcribed_text: transcript.map(|t| t.full_text),
            method: resolved.method,
            voice: Some(voice.to_string()),
            created_at: Some(Local::now()),
        };
        store.save_timing(&timing)?;

        let subtitle_path = if timing.sentences.is_empty() {
            tracing::warn!("⚠️ {} has no subtitle text, no SRT written", id);
            None
        } else {
            Some(store.save_subtitles(id, &srt_from_timing(&timing))?)
        };

        {
            let mut machine = machine.lock().await;
            machine.register_artifact(ArtifactCategory::Audio, &audio_path)?;
            if let Some(path) = &subtitle_path {
                machine.register_artifact(ArtifactCategory::Subtitles, path)?;
            }
        }

        tracing::info!(
            "✅ {}: {:.2}s, {} subtitle(s) ({:?})",
            id,
            duration,
            timing.sentences.len(),
            timing.method
        );
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::types::{ProjectSettings, TimingMethod, Transcript, TranscriptSegment};
    use crate::workflow::PhaseStateMachine;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// Scripted responses per spoken text; defaults to echoing the text.
    #[derive(Default)]
    struct ScriptedSynth {
        scripted: StdMutex<HashMap<String, VecDeque<Result<Vec<u8>, ServiceError>>>>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedSynth {
        fn script(&self, text: &str, responses: Vec<Result<Vec<u8>, ServiceError>>) {
            self.scripted
                .lock()
                .unwrap()
                .insert(text.to_string(), responses.into_iter().collect());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for ScriptedSynth {
        async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>, ServiceError> {
            self.calls.lock().unwrap().push(text.to_string());
            let next = self
                .scripted
                .lock()
                .unwrap()
                .get_mut(text)
                .and_then(|queue| queue.pop_front());
            next.unwrap_or_else(|| Ok(text.as_bytes().to_vec()))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Segments and durations keyed by audio file name.
    struct FixedTranscriber(HashMap<String, Vec<TranscriptSegment>>);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, ServiceError> {
            let name = audio_path.file_name().unwrap().to_string_lossy().to_string();
            Ok(Transcript {
                full_text: "recognizer text".into(),
                duration: None,
                segments: self.0.get(&name).cloned().unwrap_or_default(),
                words: Vec::new(),
            })
        }
    }

    struct FixedProbe(HashMap<String, f64>);

    #[async_trait]
    impl AudioProbe for FixedProbe {
        async fn duration(&self, audio_path: &Path) -> PipelineResult<f64> {
            let name = audio_path.file_name().unwrap().to_string_lossy().to_string();
            Ok(self.0.get(&name).copied().unwrap_or(1.0))
        }
    }

    fn seg(start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            text: "misheard".into(),
            start,
            end,
        }
    }

    fn scene(id: &str, display: &str) -> Scene {
        Scene {
            scene_id: SceneId::from(id),
            narration_display: display.to_string(),
            narration_tts: Some(format!("tts {}", id)),
            subtitle_display: None,
            duration: 5.0,
            required_assets: Vec::new(),
            visual_concept: None,
        }
    }

    async fn project(ids: &[&str]) -> (TempDir, SharedPhaseMachine, String) {
        let dir = tempdir().unwrap();
        let mut machine =
            PhaseStateMachine::new(dir.path().join("state.json"), dir.path().join("output"));
        let pid = machine
            .initialize("Batch", ProjectSettings::default())
            .unwrap()
            .project_id
            .unwrap();
        let scene_ids: Vec<SceneId> = ids.iter().map(|s| SceneId::from(*s)).collect();
        machine.approve_scenes(&pid, &scene_ids).unwrap();
        (dir, machine.shared(), pid)
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
        }
    }

    fn probe(pairs: &[(&str, f64)]) -> Arc<FixedProbe> {
        Arc::new(FixedProbe(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()))
    }

    #[tokio::test]
    async fn test_two_scene_project_end_to_end() {
        let (_dir, machine, _pid) = project(&["s1", "s2"]).await;
        let synth = Arc::new(ScriptedSynth::default());
        let transcriber = Arc::new(FixedTranscriber(
            [("s1_audio.mp3".to_string(), vec![seg(0.0, 1.8), seg(1.8, 4.0)])]
                .into_iter()
                .collect(),
        ));
        let runner = BatchRunner::new(synth, probe(&[("s1_audio.mp3", 4.0), ("s2_audio.mp3", 3.0)]))
            .with_transcriber(transcriber)
            .with_policy(fast());

        let scenes = vec![
            scene("s2", "A single sentence with no marker."),
            scene("s1", "First sentence.;;Second sentence."),
        ];
        let report = runner.run_all(&machine, &scenes, "ko-KR-Neural2-C", 1).await.unwrap();
        assert_eq!(report.succeeded, vec![SceneId::from("s1"), SceneId::from("s2")]);
        assert!(report.is_clean());
        assert!((report.total_duration - 7.0).abs() < 1e-9);

        let store = machine.lock().await.store().unwrap();
        let s1 = store.load_timing(&SceneId::from("s1")).unwrap().unwrap();
        assert_eq!(s1.method, TimingMethod::SegmentMatch);
        assert_eq!(s1.sentences.len(), 2);
        assert_eq!(s1.sentences[0].text, "First sentence.");
        assert_eq!((s1.sentences[0].start, s1.sentences[0].end), (0.0, 1.8));
        assert_eq!((s1.sentences[1].start, s1.sentences[1].end), (1.8, 4.0));

        let s2 = store.load_timing(&SceneId::from("s2")).unwrap().unwrap();
        assert_eq!(s2.method, TimingMethod::SingleSentence);
        assert_eq!(s2.sentences.len(), 1);
        assert_eq!((s2.sentences[0].start, s2.sentences[0].end), (0.0, 3.0));
        assert!(store.subtitle_path(&SceneId::from("s2")).is_file());

        let mut m = machine.lock().await;
        assert_eq!(m.record().current_phase, Phase::TtsCompleted);
        assert_eq!(m.record().file_registry.audio.len(), 2);
        assert_eq!(m.record().file_registry.subtitles.len(), 2);
        assert_eq!(report.next_command.as_deref(), Some("scene-done --scene s1 --file <path>"));
    }

    #[tokio::test]
    async fn test_quota_checkpoints_and_resume_reuses_earlier_timing() {
        let (_dir, machine, _pid) = project(&["s1", "s2", "s3"]).await;
        let synth = Arc::new(ScriptedSynth::default());
        synth.script("tts s2", vec![Err(ServiceError::QuotaExceeded("daily cap".into()))]);
        let durations = probe(&[("s1_audio.mp3", 4.0), ("s2_audio.mp3", 2.0), ("s3_audio.mp3", 3.0)]);
        let runner = BatchRunner::new(synth.clone(), durations.clone()).with_policy(fast());
        let scenes = vec![scene("s1", "one"), scene("s2", "two"), scene("s3", "three")];

        let report = runner.run_all(&machine, &scenes, "v", 1).await.unwrap();
        assert_eq!(report.succeeded, vec![SceneId::from("s1")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.cancelled, vec![SceneId::from("s3")]);
        assert_eq!(report.next_command.as_deref(), Some("tts-all --from 2"));
        // The quota error is not retried and s3 is never sent.
        assert_eq!(synth.calls(), vec!["tts s1".to_string(), "tts s2".to_string()]);
        {
            let mut m = machine.lock().await;
            assert_eq!(m.record().current_phase, Phase::TtsPartial);
            assert_eq!(m.record().resume_cursor, Some(2));
            assert_eq!(m.resume_point().scene_index, Some(2));
        }

        let report = runner.run_all(&machine, &scenes, "v", 2).await.unwrap();
        assert_eq!(report.reused, vec![SceneId::from("s1")]);
        assert_eq!(report.succeeded, vec![SceneId::from("s2"), SceneId::from("s3")]);
        assert!((report.total_duration - 9.0).abs() < 1e-9);
        let mut m = machine.lock().await;
        assert_eq!(m.record().current_phase, Phase::TtsCompleted);
        assert_eq!(m.record().resume_cursor, None);
    }

    #[tokio::test]
    async fn test_rate_limit_retried_and_scene_failure_is_local() {
        let (_dir, machine, _pid) = project(&["s1", "s2"]).await;
        let synth = Arc::new(ScriptedSynth::default());
        synth.script(
            "tts s1",
            vec![
                Err(ServiceError::RateLimited("429".into())),
                Err(ServiceError::RateLimited("429".into())),
            ],
        );
        synth.script("tts s2", vec![Err(ServiceError::Failed("invalid voice".into()))]);
        let runner = BatchRunner::new(synth.clone(), probe(&[])).with_policy(fast()).with_workers(2);
        let scenes = vec![scene("s1", "one"), scene("s2", "two")];

        let report = runner.run_all(&machine, &scenes, "v", 1).await.unwrap();
        assert_eq!(report.succeeded, vec![SceneId::from("s1")]);
        assert_eq!(report.failed[0].0, SceneId::from("s2"));
        assert!(report.stopped_reason.is_none());
        assert_eq!(report.next_command.as_deref(), Some("tts --scene s2"));
        assert_eq!(synth.calls().iter().filter(|c| *c == "tts s1").count(), 3);
        assert_eq!(machine.lock().await.record().current_phase, Phase::ScenesApproved);

        // Fixing the failed scene alone completes the stage.
        let report = runner
            .run_scene(&machine, &scenes, &SceneId::from("s2"), "v")
            .await
            .unwrap();
        assert_eq!(report.succeeded, vec![SceneId::from("s2")]);
        assert_eq!(machine.lock().await.record().current_phase, Phase::TtsCompleted);
    }

    #[tokio::test]
    async fn test_batch_before_scene_approval_is_rejected() {
        let dir = tempdir().unwrap();
        let mut machine =
            PhaseStateMachine::new(dir.path().join("state.json"), dir.path().join("output"));
        machine.initialize("Early", ProjectSettings::default()).unwrap();
        let machine = machine.shared();
        let synth = Arc::new(ScriptedSynth::default());
        let runner = BatchRunner::new(synth.clone(), probe(&[("s1_audio.mp3", 2.0)]));

        let err = runner
            .run_all(&machine, &[scene("s1", "one")], "v", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(synth.calls().is_empty());

        let mut machine = machine.lock().await;
        assert_eq!(machine.record().current_phase, Phase::Initialized);
        assert_eq!(machine.record().scene_roster.total, 0);
    }

    #[tokio::test]
    async fn test_resume_index_past_end_is_rejected() {
        let (_dir, machine, _pid) = project(&["s1"]).await;
        let runner = BatchRunner::new(Arc::new(ScriptedSynth::default()), probe(&[]));
        let err = runner
            .run_all(&machine, &[scene("s1", "one")], "v", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
