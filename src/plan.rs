//! План проекта: единственная сохраняемая запись о ролике
//!
//! План создается внешним планировщиком, затем дорабатывается на этапах
//! конвейера и сохраняется после каждого перехода.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AssemblyError, Result};
use crate::pipeline::stage::ProjectStatus;
use crate::timeline::model::{BeatGrid, DialogueLine, Scene, TransitionType, VoiceIdentity};
use crate::timeline::time::Millis;

/// Сценарий: сцены и реплики
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Script {
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub lines: Vec<DialogueLine>,
}

/// Запись о переходе между этапами
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub status: ProjectStatus,
    pub at: DateTime<Utc>,
}

/// План ролика
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub project_id: String,
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub status: ProjectStatus,
    pub script: Script,
    /// Реестр персонажей
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub transition_type: TransitionType,
    pub target_duration: Millis,
    /// Явное зерно для порядка подгонки длительностей
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub beat_grid: Option<BeatGrid>,
    #[serde(default)]
    pub music_path: Option<PathBuf>,
    #[serde(default)]
    pub voices: VoiceIdentity,
    #[serde(default)]
    pub final_video_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub history: Vec<StageRecord>,
}

impl Plan {
    pub fn new(project_id: impl Into<String>, brief: impl Into<String>, script: Script, target_duration: Millis) -> Self {
        Self {
            project_id: project_id.into(),
            brief: brief.into(),
            status: ProjectStatus::Planning,
            script,
            characters: Vec::new(),
            transition_type: TransitionType::Cut,
            target_duration,
            seed: None,
            beat_grid: None,
            music_path: None,
            voices: VoiceIdentity::default(),
            final_video_path: None,
            error: None,
            history: Vec::new(),
        }
    }

    /// Текст, из которого выводится зерно подгонки длительностей
    pub fn seed_text(&self) -> String {
        match &self.seed {
            Some(seed) => seed.clone(),
            None => format!("{}{}", self.project_id, self.brief),
        }
    }

    /// Перейти на следующий этап и записать переход в историю
    pub fn advance(&mut self, to: ProjectStatus) -> Result<()> {
        self.status = self.status.transition(to)?;
        self.history.push(StageRecord { status: to, at: Utc::now() });
        Ok(())
    }

    /// Перевести проект в `failed` и сохранить текст ошибки
    pub fn fail(&mut self, error: &AssemblyError) {
        self.error = Some(error.to_string());
        if self.status.can_transition_to(ProjectStatus::Failed) {
            self.status = ProjectStatus::Failed;
            self.history.push(StageRecord { status: ProjectStatus::Failed, at: Utc::now() });
        }
    }

    /// Проверить структуру плана перед запуском
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(AssemblyError::Configuration("plan has no project_id".to_string()));
        }
        if self.script.scenes.is_empty() {
            return Err(AssemblyError::Configuration(format!("plan {} has no scenes", self.project_id)));
        }
        let mut ids: Vec<u32> = self.script.scenes.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.script.scenes.len() {
            return Err(AssemblyError::Configuration(format!("plan {} has duplicate scene ids", self.project_id)));
        }
        if self.target_duration <= Millis::ZERO {
            return Err(AssemblyError::Configuration("target_duration must be positive".to_string()));
        }
        Ok(())
    }
}
