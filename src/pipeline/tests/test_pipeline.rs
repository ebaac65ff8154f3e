use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{AssemblyConfig, BackoffPolicy};
use crate::error::{AssemblyError, FailureKind, ProviderResult, Result};
use crate::media::probe::DurationProbe;
use crate::pipeline::{JsonFileStore, Pipeline, PlanStore, ProjectStatus, Providers};
use crate::plan::{Plan, Script};
use crate::providers::{
    ImageProvider, ProviderChain, SceneRequest, SpeechSynthesizer, TaskHandle, TaskStatus, VideoProvider,
};
use crate::timeline::model::{word_count, DialogueLine, Scene, TransitionType};
use crate::timeline::time::Millis;
use crate::utils::ffmpeg::MediaEngine;
use crate::utils::testing::{RecordingEngine, WordRateSpeech};

struct CountingImages {
    calls: AtomicUsize,
}

#[async_trait]
impl ImageProvider for CountingImages {
    fn name(&self) -> &str {
        "images"
    }

    async fn render(&self, request: &SceneRequest) -> ProviderResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(request.output_dir.join(format!("scene_{}.png", request.scene_id)))
    }
}

struct InstantVideo {
    fails: bool,
}

#[async_trait]
impl VideoProvider for InstantVideo {
    fn name(&self) -> &str {
        "video"
    }

    async fn submit(&self, request: &SceneRequest) -> ProviderResult<TaskHandle> {
        Ok(TaskHandle { id: request.scene_id.to_string(), provider: "video".to_string() })
    }

    async fn poll(&self, task: &TaskHandle) -> ProviderResult<TaskStatus> {
        if self.fails {
            return Ok(TaskStatus::Failed("content policy".to_string()));
        }
        Ok(TaskStatus::Done(PathBuf::from(format!("/clips/{}.mp4", task.id))))
    }
}

/// Сведенный WAV длится ровно `wav`, речь - по числу слов
struct PipelineProbe {
    per_word: Millis,
    wav: Millis,
}

#[async_trait]
impl DurationProbe for PipelineProbe {
    async fn duration(&self, path: &Path) -> Result<Millis> {
        if path.extension().and_then(|e| e.to_str()) == Some("wav") {
            return Ok(self.wav);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(self.per_word * word_count(&text) as i64)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    pipeline: Pipeline,
    store: Arc<JsonFileStore>,
    engine: Arc<RecordingEngine>,
    images: Arc<CountingImages>,
    speech: Arc<WordRateSpeech>,
}

fn config(dir: &Path, pause_after: Option<ProjectStatus>) -> AssemblyConfig {
    let fast = BackoffPolicy {
        initial: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        max_attempts: 3,
        rate_limit_multiplier: 1,
    };
    let mut config = AssemblyConfig::default();
    config.pipeline.submit_stagger = Duration::from_millis(1);
    config.pipeline.poll_backoff = fast.clone();
    config.pipeline.call_backoff = BackoffPolicy { max_attempts: 1, ..fast };
    config.pipeline.task_timeout = Duration::from_millis(500);
    config.pipeline.pause_after = pause_after;
    config.pipeline.work_dir = Some(dir.join("work"));
    config
}

fn harness(pause_after: Option<ProjectStatus>, speech: WordRateSpeech, video_fails: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("plans")).unwrap());
    let engine = Arc::new(RecordingEngine::new());
    let images = Arc::new(CountingImages { calls: AtomicUsize::new(0) });
    let speech = Arc::new(speech);

    let speech_chain: ProviderChain<dyn SpeechSynthesizer> = ProviderChain::new(speech.clone());
    let image_chain: ProviderChain<dyn ImageProvider> = ProviderChain::new(images.clone());
    let video_chain: ProviderChain<dyn VideoProvider> = ProviderChain::new(Arc::new(InstantVideo { fails: video_fails }));
    let providers = Providers { images: image_chain, videos: video_chain, speech: speech_chain, shortener: None };

    let media: Arc<dyn MediaEngine> = engine.clone();
    let probe: Arc<dyn DurationProbe> =
        Arc::new(PipelineProbe { per_word: Millis::from_ms(300), wav: Millis::from_secs(16) });
    let plans: Arc<dyn PlanStore> = store.clone();
    let pipeline = Pipeline::new(
        config(dir.path(), pause_after),
        providers,
        media,
        probe,
        plans,
        dir.path().join("out"),
    )
    .unwrap();

    Harness { _dir: dir, pipeline, store, engine, images, speech }
}

fn plan() -> Plan {
    let script = Script {
        scenes: vec![
            Scene::new(1, Millis::from_secs(4), "A barista pours coffee"),
            Scene::new(2, Millis::from_secs(4), "Steam rises from the cup"),
            Scene::new(3, Millis::from_secs(8), "Logo on a warm background"),
        ],
        lines: vec![
            DialogueLine::new("Narrator", "Morning starts here.").in_scene(1),
            DialogueLine::new("Narrator", "Freshly roasted.").in_scene(2),
            DialogueLine::new("Narrator", "Try it today.").in_scene(3),
        ],
    };
    let mut plan = Plan::new("coffee-16", "coffee ad", script, Millis::from_secs(16));
    plan.transition_type = TransitionType::Cut;
    plan
}

#[tokio::test]
async fn runs_every_stage_and_persists_result() {
    let h = harness(None, WordRateSpeech::new(Millis::from_ms(300)), false);
    let mut plan = plan();

    let status = h.pipeline.run(&mut plan, None).await.unwrap();

    assert_eq!(status, ProjectStatus::Completed);
    let output = plan.final_video_path.clone().unwrap();
    assert!(output.ends_with("coffee-16/final.mp4"));
    assert!(output.exists());
    assert_eq!(plan.history.len(), 7);
    assert_eq!(h.images.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.speech.calls(), 3);
    assert!(plan.script.scenes.iter().all(|s| s.clip_path.is_some() && s.actual_start.is_some()));
    assert!(plan.script.lines.iter().all(|l| l.voice_id.is_some() && l.measured_duration.is_some()));

    let runs = h.engine.runs();
    assert!(runs.iter().any(|args| args.iter().any(|a| a.contains("loudnorm"))));
    assert!(runs.iter().any(|args| args.iter().any(|a| a.contains("concat=n=3"))));

    let stored = h.store.load("coffee-16").await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Completed);
    assert_eq!(stored.final_video_path, Some(output));
}

#[tokio::test]
async fn pauses_and_resumes_from_stored_status() {
    let h = harness(Some(ProjectStatus::ImagesComplete), WordRateSpeech::new(Millis::from_ms(300)), false);
    let mut plan = plan();

    let status = h.pipeline.run(&mut plan, None).await.unwrap();
    assert_eq!(status, ProjectStatus::ImagesComplete);
    assert_eq!(h.images.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.speech.calls(), 0);

    let mut stored = h.store.load("coffee-16").await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::ImagesComplete);
    assert!(stored.script.scenes.iter().all(|s| s.image_path.is_some()));

    // Второй запуск продолжает с сохраненного этапа и не повторяет изображения
    let mut config = h.pipeline.config.clone();
    config.pipeline.pause_after = None;
    let resumed = Pipeline::new(
        config,
        h.pipeline.providers.clone(),
        h.pipeline.engine.clone(),
        h.pipeline.probe.clone(),
        h.pipeline.store.clone(),
        h.pipeline.output_dir.clone(),
    )
    .unwrap();
    let status = resumed.run(&mut stored, None).await.unwrap();

    assert_eq!(status, ProjectStatus::Completed);
    assert_eq!(h.images.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.speech.calls(), 3);
}

#[tokio::test]
async fn missing_voiceover_fails_the_project() {
    let h = harness(None, WordRateSpeech::failing(FailureKind::Rejected("voice blocked".into())), false);
    let mut plan = plan();

    let err = h.pipeline.run(&mut plan, None).await.unwrap_err();

    assert!(matches!(err, AssemblyError::FatalIntegrity(_)));
    assert_eq!(plan.status, ProjectStatus::Failed);
    let stored = h.store.load("coffee-16").await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Failed);
    assert!(stored.error.unwrap().contains("voice lines"));
    assert!(h.engine.runs().is_empty());
}

#[tokio::test]
async fn one_silent_line_fails_the_project() {
    let h = harness(None, WordRateSpeech::rejecting(Millis::from_ms(300), "Freshly roasted."), false);
    let mut plan = plan();

    let err = h.pipeline.run(&mut plan, None).await.unwrap_err();

    assert!(matches!(err, AssemblyError::FatalIntegrity(_)));
    assert_eq!(plan.status, ProjectStatus::Failed);
    assert!(plan.final_video_path.is_none());
    assert_eq!(plan.script.lines.iter().filter(|l| l.audio_path.is_some()).count(), 2);
    // Ни сведения, ни кодирования
    assert!(h.engine.runs().is_empty());

    let stored = h.store.load("coffee-16").await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Failed);
    assert!(stored.final_video_path.is_none());
    assert!(stored.error.unwrap().contains("1 of 3 voice lines"));
}

#[tokio::test]
async fn zero_clips_fail_the_project() {
    let h = harness(None, WordRateSpeech::new(Millis::from_ms(300)), true);
    let mut plan = plan();

    let err = h.pipeline.run(&mut plan, None).await.unwrap_err();

    assert!(matches!(err, AssemblyError::FatalIntegrity(_)));
    assert!(plan.final_video_path.is_none());
    let stored = h.store.load("coffee-16").await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Failed);
}

#[tokio::test]
async fn invalid_plan_is_rejected_before_any_stage() {
    let h = harness(None, WordRateSpeech::new(Millis::from_ms(300)), false);
    let mut plan = plan();
    plan.script.scenes.clear();

    let err = h.pipeline.run(&mut plan, None).await.unwrap_err();

    assert!(matches!(err, AssemblyError::Configuration(_)));
    assert_eq!(plan.status, ProjectStatus::Planning);
    assert!(h.store.load("coffee-16").await.unwrap().is_none());
}
