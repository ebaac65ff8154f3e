//! Основной файл библиотеки ad-assembly
//!
//! Библиотека синхронизирует таймлайн короткого рекламного ролика и собирает
//! итоговое видео: подгоняет длительности сцен, распределяет реплики,
//! подгоняет озвучку под слоты, сводит звук и кодирует результат.

pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod providers;
pub mod timeline;
pub mod utils;
pub mod voiceover;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, Result};
use crate::media::probe::{DurationProbe, MediaProbe};
use crate::pipeline::{JsonFileStore, Pipeline, PlanStore, ProjectStatus, Providers};
use crate::plan::Plan;
use crate::progress::{ProgressObserver, ProgressReporter, ProgressTracker};
use crate::utils::ffmpeg::{FfmpegEngine, MediaEngine};

pub use crate::error::{FailureKind, ProviderResult};
pub use crate::timeline::{DialogueLine, Millis, Scene, TransitionType};

/// Основная структура для работы с библиотекой
pub struct AdAssembler {
    /// Конфигурация библиотеки
    config: AssemblyConfig,
    /// Трекер прогресса
    progress_tracker: Option<ProgressTracker>,
}

impl AdAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config, progress_tracker: None }
    }

    /// Создать экземпляр с репортером прогресса
    pub fn with_progress_reporter(config: AssemblyConfig, reporter: Box<dyn ProgressReporter>) -> Self {
        Self { config, progress_tracker: Some(ProgressTracker::with_reporter(reporter)) }
    }

    pub fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        match &mut self.progress_tracker {
            Some(tracker) => tracker.set_reporter(reporter),
            None => self.progress_tracker = Some(ProgressTracker::with_reporter(reporter)),
        }
    }

    /// Добавить наблюдателя прогресса
    ///
    /// Без установленного репортера наблюдатель некому передать, возвращается ошибка.
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> Result<usize> {
        self.progress_tracker
            .as_mut()
            .and_then(|tracker| tracker.add_observer(observer))
            .ok_or_else(|| AssemblyError::Configuration("no progress reporter set".to_string()))
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Собрать конвейер с ffmpeg и хранилищем планов в `<output_dir>/plans`
    pub fn pipeline(&self, providers: Providers, output_dir: impl Into<PathBuf>) -> Result<Pipeline> {
        let output_dir = output_dir.into();
        let engine: Arc<dyn MediaEngine> = Arc::new(FfmpegEngine::new());
        let probe: Arc<dyn DurationProbe> = Arc::new(MediaProbe::new(Arc::clone(&engine)));
        let store: Arc<dyn PlanStore> = Arc::new(JsonFileStore::new(output_dir.join("plans"))?);
        Pipeline::new(self.config.clone(), providers, engine, probe, store, output_dir)
    }

    /// Обработать проект
    ///
    /// Если в хранилище уже есть план с тем же `project_id`, работа продолжается
    /// с сохраненного этапа, иначе запускается переданный план.
    pub async fn process(&self, pipeline: &Pipeline, plan: Plan) -> Result<Plan> {
        log::info!("Starting assembly of project {}", plan.project_id);

        let mut plan = match pipeline.store().load(&plan.project_id).await? {
            Some(stored) if stored.status != ProjectStatus::Failed => {
                log::info!("Resuming project {} from {}", stored.project_id, stored.status);
                stored
            }
            _ => plan,
        };

        let status = pipeline.run(&mut plan, self.progress_tracker.as_ref()).await?;
        log::info!("Project {} stopped at {}", plan.project_id, status);
        Ok(plan)
    }
}

impl Default for AdAssembler {
    fn default() -> Self {
        Self::new(AssemblyConfig::default())
    }
}
