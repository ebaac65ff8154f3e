//! # Pipeline
//!
//! Конвейер этапов проекта. Каждый переход сохраняется в хранилище до начала
//! следующего этапа, поэтому прерванный проект продолжается с сохраненного
//! состояния. Внутри этапа внешние вызовы выполняются ограниченным пулом.

pub mod jobs;
pub mod pool;
pub mod stage;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, Result};
use crate::media::audio::AudioMixer;
use crate::media::encode::AdaptiveEncoder;
use crate::media::probe::DurationProbe;
use crate::media::video::build_video_graph;
use crate::plan::Plan;
use crate::progress::{ProcessStep, ProgressTracker};
use crate::providers::{
    ImageProvider, ProviderChain, SceneRequest, SpeechRequest, SpeechSynthesizer, TextShortener, VideoProvider,
};
use crate::timeline::align::align_dialogue;
use crate::timeline::compositor::{apply_to_scenes, compose, remap_lines};
use crate::timeline::reconcile::{reconcile_durations, seed_from};
use crate::timeline::time::Millis;
use crate::utils::ffmpeg::MediaEngine;
use crate::utils::temp::TempFileManager;
use crate::voiceover::fit::{FitOutcome, FitRegulator};

pub use jobs::generate_clips;
pub use pool::fan_out;
pub use stage::ProjectStatus;
pub use store::{JsonFileStore, PlanStore};

/// Провайдеры всех возможностей
#[derive(Clone)]
pub struct Providers {
    pub images: ProviderChain<dyn ImageProvider>,
    pub videos: ProviderChain<dyn VideoProvider>,
    pub speech: ProviderChain<dyn SpeechSynthesizer>,
    pub shortener: Option<Arc<dyn TextShortener>>,
}

/// Конвейер сборки одного или нескольких проектов
pub struct Pipeline {
    config: AssemblyConfig,
    providers: Providers,
    engine: Arc<dyn MediaEngine>,
    probe: Arc<dyn DurationProbe>,
    store: Arc<dyn PlanStore>,
    /// Куда складываются ассеты и итоговые ролики
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        config: AssemblyConfig,
        providers: Providers,
        engine: Arc<dyn MediaEngine>,
        probe: Arc<dyn DurationProbe>,
        store: Arc<dyn PlanStore>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, providers, engine, probe, store, output_dir: output_dir.into() })
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    /// Выполнить этапы, начиная с сохраненного статуса плана
    ///
    /// Возвращает статус, на котором конвейер остановился: `completed` или этап
    /// из `pause_after`. Фатальная ошибка переводит план в `failed` и сохраняет
    /// текст ошибки.
    pub async fn run(&self, plan: &mut Plan, tracker: Option<&ProgressTracker>) -> Result<ProjectStatus> {
        plan.validate()?;
        info!("Running project {} from status {}", plan.project_id, plan.status);

        loop {
            let status = plan.status;
            if status.is_terminal() {
                return Ok(status);
            }

            if let Err(e) = self.run_stage(plan, tracker).await {
                error!("Project {} failed at {}: {}", plan.project_id, status, e);
                if e.is_fatal() {
                    plan.fail(&e);
                    self.store.save(plan).await?;
                }
                return Err(e);
            }
            self.store.save(plan).await?;

            if self.config.pipeline.pause_after == Some(plan.status) {
                info!("Project {} paused after {}", plan.project_id, plan.status);
                return Ok(plan.status);
            }
        }
    }

    async fn run_stage(&self, plan: &mut Plan, tracker: Option<&ProgressTracker>) -> Result<()> {
        match plan.status {
            ProjectStatus::Planning => {
                self.prepare_timeline(plan, tracker);
                plan.advance(ProjectStatus::Planned)
            }
            ProjectStatus::Planned => plan.advance(ProjectStatus::GeneratingImages),
            ProjectStatus::GeneratingImages => {
                self.generate_images(plan, tracker).await?;
                plan.advance(ProjectStatus::ImagesComplete)
            }
            ProjectStatus::ImagesComplete => plan.advance(ProjectStatus::GeneratingVideos),
            ProjectStatus::GeneratingVideos => {
                self.generate_videos(plan, tracker).await?;
                self.generate_voiceover(plan, tracker).await?;
                plan.advance(ProjectStatus::VideosComplete)
            }
            ProjectStatus::VideosComplete => plan.advance(ProjectStatus::Assembling),
            ProjectStatus::Assembling => {
                let output = self.assemble(plan, tracker).await?;
                plan.final_video_path = Some(output);
                if let Some(t) = tracker {
                    t.complete();
                }
                plan.advance(ProjectStatus::Completed)
            }
            ProjectStatus::Completed | ProjectStatus::Failed => Ok(()),
        }
    }

    /// Подгонка длительностей, распределение реплик и назначение голосов
    pub fn prepare_timeline(&self, plan: &mut Plan, tracker: Option<&ProgressTracker>) {
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Reconcile);
        }
        let overlap = if plan.transition_type.is_crossfade() {
            self.config.compositor.crossfade_overlap
        } else {
            Millis::ZERO
        };
        let seed = seed_from(&plan.seed_text());
        let report = reconcile_durations(
            &mut plan.script.scenes,
            plan.target_duration,
            overlap,
            seed,
            &self.config.reconcile,
        );
        info!(
            "Scene durations reconciled: total {} for desired {} in {} passes",
            report.total, report.desired, report.passes
        );

        if let Some(t) = tracker {
            t.set_step(ProcessStep::Align);
        }
        let report = align_dialogue(
            &plan.script.scenes,
            &mut plan.script.lines,
            &plan.characters,
            false,
            &self.config.align,
        );
        if !report.relocated.is_empty() || !report.overflow.is_empty() {
            info!(
                "Alignment moved {} lines, {} scenes over capacity",
                report.relocated.len(),
                report.overflow.len()
            );
        }

        let speakers: Vec<String> = plan.script.lines.iter().map(|l| l.speaker.clone()).collect();
        plan.voices.resolve(speakers.iter().map(String::as_str), &self.config.voices);
        plan.voices.apply(&mut plan.script.lines);
    }

    fn assets_dir(&self, plan: &Plan, kind: &str) -> Result<PathBuf> {
        let dir = self.output_dir.join(&plan.project_id).join(kind);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn scene_request(&self, plan: &Plan, idx: usize, output_dir: &Path) -> SceneRequest {
        let scene = &plan.script.scenes[idx];
        SceneRequest {
            scene_id: scene.id,
            subject: scene.subject.clone(),
            motion: scene.motion.clone(),
            duration: scene.duration,
            image_path: scene.image_path.clone(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Сгенерировать недостающие изображения сцен
    async fn generate_images(&self, plan: &mut Plan, tracker: Option<&ProgressTracker>) -> Result<()> {
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Images);
        }
        let dir = self.assets_dir(plan, "images")?;
        let items: Vec<(u32, SceneRequest)> = (0..plan.script.scenes.len())
            .filter(|&i| plan.script.scenes[i].image_path.is_none())
            .map(|i| (plan.script.scenes[i].id, self.scene_request(plan, i, &dir)))
            .collect();
        let requested = items.len();

        let results = fan_out(items, self.config.pipeline.concurrency, |_, request| {
            let chain = self.providers.images.clone();
            let policy = self.config.pipeline.call_backoff.clone();
            async move { chain.render(&request, &policy).await }
        })
        .await;

        let mut failed = 0;
        for (scene_id, result) in results {
            match result {
                Some(Ok(path)) => {
                    if let Some(scene) = plan.script.scenes.iter_mut().find(|s| s.id == scene_id) {
                        scene.image_path = Some(path);
                    }
                }
                Some(Err(failure)) => {
                    warn!("Image for scene {} failed: {}", scene_id, failure);
                    failed += 1;
                }
                None => failed += 1,
            }
        }
        if failed > 0 {
            warn!("{}", AssemblyError::PartialFailure(format!("{} of {} images failed", failed, requested)));
        }
        if let Some(t) = tracker {
            t.update_step_progress(100.0, Some(format!("{} images", requested - failed)));
        }
        Ok(())
    }

    /// Сгенерировать недостающие клипы сцен
    async fn generate_videos(&self, plan: &mut Plan, tracker: Option<&ProgressTracker>) -> Result<()> {
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Videos);
        }
        let dir = self.assets_dir(plan, "clips")?;
        let requests: Vec<SceneRequest> = (0..plan.script.scenes.len())
            .filter(|&i| plan.script.scenes[i].clip_path.is_none())
            .map(|i| self.scene_request(plan, i, &dir))
            .collect();
        let requested = requests.len();

        let results = generate_clips(requests, &self.providers.videos, &self.config.pipeline).await;

        let mut failed = 0;
        for (scene_id, result) in results {
            match result {
                Ok(path) => {
                    if let Some(scene) = plan.script.scenes.iter_mut().find(|s| s.id == scene_id) {
                        scene.clip_path = Some(path);
                    }
                }
                Err(failure) => {
                    warn!("Clip for scene {} failed: {}", scene_id, failure);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            warn!("{}", AssemblyError::PartialFailure(format!("{} of {} clips failed", failed, requested)));
        }
        if let Some(t) = tracker {
            t.update_step_progress(100.0, Some(format!("{} clips", requested - failed)));
        }
        Ok(())
    }

    /// Синтезировать реплики без аудио и измерить их длительность
    async fn generate_voiceover(&self, plan: &mut Plan, tracker: Option<&ProgressTracker>) -> Result<()> {
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Voiceover);
        }
        let dir = self.assets_dir(plan, "voiceover")?;
        let mut items = Vec::new();
        for (i, line) in plan.script.lines.iter().enumerate() {
            if line.audio_path.is_some() {
                continue;
            }
            let Some(voice) = line.voice_id.clone() else {
                warn!("Line {} ('{}') has no voice, skipping synthesis", i, line.speaker);
                continue;
            };
            let request = SpeechRequest {
                text: line.text.clone(),
                voice,
                output: dir.join(format!("line_{:03}.mp3", i)),
            };
            items.push((i, request));
        }
        let requested = items.len();

        let results = fan_out(items, self.config.pipeline.concurrency, |_, request| {
            let chain = self.providers.speech.clone();
            let probe = Arc::clone(&self.probe);
            let policy = self.config.pipeline.call_backoff.clone();
            async move {
                let path = chain
                    .synthesize(&request, &policy)
                    .await
                    .map_err(|kind| AssemblyError::Provider { item: request.text.clone(), kind })?;
                let measured = probe.duration(&path).await?;
                Ok::<_, AssemblyError>((path, measured))
            }
        })
        .await;

        let mut failed = 0;
        for (i, result) in results {
            match result {
                Some(Ok((path, measured))) => {
                    let line = &mut plan.script.lines[i];
                    line.audio_path = Some(path);
                    line.measured_duration = Some(measured);
                }
                Some(Err(e)) => {
                    warn!("Voiceover for line {} failed: {}", i, e);
                    failed += 1;
                }
                None => failed += 1,
            }
        }
        if failed > 0 {
            warn!("{}", AssemblyError::PartialFailure(format!("{} of {} voice lines failed", failed, requested)));
        }
        if let Some(t) = tracker {
            t.update_step_progress(100.0, Some(format!("{} voice lines", requested - failed)));
        }
        Ok(())
    }

    /// Подогнать озвучку, скомпоновать таймлайн, свести звук и закодировать ролик
    async fn assemble(&self, plan: &mut Plan, tracker: Option<&ProgressTracker>) -> Result<PathBuf> {
        // Реплика без аудио после всех повторов не должна попасть в ролик
        let silent: Vec<String> = plan
            .script
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.audio_path.is_none())
            .map(|(i, line)| format!("#{} {}", i, line.speaker))
            .collect();
        if !silent.is_empty() {
            return Err(AssemblyError::FatalIntegrity(format!(
                "{} of {} voice lines have no audio: {}",
                silent.len(),
                plan.script.lines.len(),
                silent.join(", ")
            )));
        }

        // Подгонка озвучки и повторное выравнивание с закрепленными говорящими
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Voiceover);
        }
        let regulator = FitRegulator::new(
            self.config.fit.clone(),
            self.providers.speech.clone(),
            self.providers.shortener.clone(),
            Arc::clone(&self.probe),
            self.config.pipeline.call_backoff.clone(),
        );
        let outcomes = regulator.regulate_all(&mut plan.script.lines).await?;
        let refitted = outcomes.iter().filter(|o| matches!(o, FitOutcome::Refitted { .. })).count();
        let exhausted = outcomes.iter().filter(|o| matches!(o, FitOutcome::Exhausted { .. })).count();
        info!("Voiceover fit: {} refitted, {} exhausted", refitted, exhausted);
        align_dialogue(&plan.script.scenes, &mut plan.script.lines, &plan.characters, true, &self.config.align);

        // Компоновка
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Composite);
        }
        let composition = compose(
            &plan.script.scenes,
            plan.transition_type,
            plan.beat_grid.as_ref(),
            &self.config.compositor,
        );
        apply_to_scenes(&mut plan.script.scenes, &composition);
        let timeline_lines = remap_lines(&plan.script.lines, &plan.script.scenes, &composition);
        let video_graph =
            build_video_graph(&plan.script.scenes, &composition, plan.transition_type, &self.config.encode)?;

        // Сведение
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Mix);
        }
        let mut temp = TempFileManager::new(
            self.config.pipeline.work_dir.as_deref(),
            self.config.pipeline.cleanup_temp_files,
        )?;
        let mix_path = temp.temp_path("master", "wav");
        let mixer = AudioMixer::new(Arc::clone(&self.engine), Arc::clone(&self.probe), self.config.mix.clone());
        mixer
            .mix(
                &timeline_lines,
                &plan.script.scenes,
                plan.music_path.as_deref(),
                composition.total,
                &mix_path,
            )
            .await?;

        // Кодирование
        if let Some(t) = tracker {
            t.set_step(ProcessStep::Encode);
        }
        let out_dir = self.output_dir.join(&plan.project_id);
        std::fs::create_dir_all(&out_dir)?;
        let output = out_dir.join("final.mp4");
        let encoder = AdaptiveEncoder::new(Arc::clone(&self.engine), self.config.encode.clone());
        let output = encoder.encode(&video_graph, &mix_path, composition.total, &output).await?;

        temp.cleanup()?;
        info!("Project {} assembled: {} ({})", plan.project_id, output.display(), composition.total);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    mod test_pipeline;
}
