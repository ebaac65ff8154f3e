//! Модель таймлайна: сцены, реплики, таблица вместимости, бит-сетка и голоса

use std::collections::BTreeMap;
use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::VoiceConfig;
use crate::error::{AssemblyError, Result};
use crate::timeline::time::{Millis, TimeRange};

/// Каноническое имя закадрового голоса
pub const NARRATOR: &str = "Narrator";

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"[\p{L}\p{N}']+").unwrap();
}

/// Сцена ролика
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    /// Стабильный идентификатор
    pub id: u32,
    /// Плановая длительность клипа
    pub duration: Millis,
    /// Что видно в кадре (по этому тексту определяются персонажи сцены)
    #[serde(default)]
    pub subject: String,
    /// Указания по движению камеры (для провайдеров видео)
    #[serde(default)]
    pub motion: Option<String>,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub clip_path: Option<PathBuf>,
    /// Короткий звуковой эффект сцены
    #[serde(default)]
    pub sfx_path: Option<PathBuf>,
    /// Фактическое начало клипа на итоговом таймлайне (вычисляется компоновщиком)
    #[serde(default)]
    pub actual_start: Option<Millis>,
}

impl Scene {
    pub fn new(id: u32, duration: Millis, subject: impl Into<String>) -> Self {
        Self {
            id,
            duration,
            subject: subject.into(),
            motion: None,
            image_path: None,
            clip_path: None,
            sfx_path: None,
            actual_start: None,
        }
    }

    /// Упоминается ли персонаж в кадре как отдельное слово
    pub fn mentions(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            return false;
        }
        let pattern = format!(r"(?i)\b{}\b", regex::escape(name.trim()));
        match Regex::new(&pattern) {
            Ok(re) => re.is_match(&self.subject),
            Err(_) => false,
        }
    }

    /// Персонажи реестра, которые видны в кадре
    pub fn speakers_mentioned(&self, registry: &[String]) -> Vec<String> {
        registry
            .iter()
            .filter(|name| self.mentions(name))
            .cloned()
            .collect()
    }
}

/// Плановые окна сцен при стыковке встык: сцены идут подряд без перекрытий
pub fn planned_windows(scenes: &[Scene]) -> Vec<TimeRange> {
    let mut cursor = Millis::ZERO;
    scenes
        .iter()
        .map(|scene| {
            let window = TimeRange::new(cursor, cursor + scene.duration);
            cursor = window.end;
            window
        })
        .collect()
}

/// Сумма плановых длительностей
pub fn total_duration(scenes: &[Scene]) -> Millis {
    scenes.iter().map(|s| s.duration).sum()
}

/// Реплика диалога или закадрового текста
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
    /// Назначенная сцена
    #[serde(default)]
    pub scene_id: Option<u32>,
    /// До выравнивания: примерная подсказка времени; после: слот на таймлайне
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    /// Голос синтеза, закрепленный за говорящим
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub audio_path: Option<PathBuf>,
    /// Измеренная длительность синтезированной речи
    #[serde(default)]
    pub measured_duration: Option<Millis>,
}

impl DialogueLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            scene_id: None,
            time_range: None,
            voice_id: None,
            audio_path: None,
            measured_duration: None,
        }
    }

    pub fn in_scene(mut self, scene_id: u32) -> Self {
        self.scene_id = Some(scene_id);
        self
    }

    pub fn with_hint(mut self, start: Millis, end: Millis) -> Self {
        self.time_range = Some(TimeRange::new(start, end));
        self
    }

    /// Количество слов в тексте
    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }

    pub fn is_narrator(&self) -> bool {
        self.speaker == NARRATOR
    }

    /// Длительность выделенного слота
    pub fn slot(&self) -> Option<Millis> {
        self.time_range.map(|r| r.duration())
    }
}

/// Количество слов в произвольном тексте
pub fn word_count(text: &str) -> usize {
    WORD_RE.find_iter(text).count()
}

/// Ступень таблицы вместимости
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityTier {
    /// Включительная верхняя граница длительности сцены
    pub up_to: Millis,
    pub max_lines: usize,
}

/// Максимальное количество реплик для сцены заданной длительности
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityTable {
    pub tiers: Vec<CapacityTier>,
    /// Вместимость для сцен длиннее последней ступени
    pub default_max: usize,
}

impl Default for CapacityTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                CapacityTier { up_to: Millis::from_secs(4), max_lines: 3 },
                CapacityTier { up_to: Millis::from_secs(6), max_lines: 4 },
            ],
            default_max: 5,
        }
    }
}

impl CapacityTable {
    pub fn max_lines(&self, duration: Millis) -> usize {
        self.tiers
            .iter()
            .find(|tier| duration <= tier.up_to)
            .map(|tier| tier.max_lines)
            .unwrap_or(self.default_max)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiers.windows(2).any(|w| w[0].up_to >= w[1].up_to) {
            return Err(AssemblyError::Configuration(
                "align.capacity tiers must be strictly ascending".to_string(),
            ));
        }
        if self.default_max == 0 || self.tiers.iter().any(|t| t.max_lines == 0) {
            return Err(AssemblyError::Configuration(
                "align.capacity must allow at least one line per scene".to_string(),
            ));
        }
        Ok(())
    }
}

/// Бит-сетка музыкальной подложки
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeatGrid {
    pub bpm: f64,
    /// Моменты битов по возрастанию
    pub beats: Vec<Millis>,
    #[serde(default)]
    pub drop_time: Option<Millis>,
}

impl BeatGrid {
    /// Самый поздний бит в интервале `[from, to]`
    pub fn latest_in(&self, from: Millis, to: Millis) -> Option<Millis> {
        self.beats
            .iter()
            .copied()
            .filter(|b| *b >= from && *b <= to)
            .max()
    }
}

/// Тип перехода между клипами
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Жесткая склейка
    #[default]
    Cut,
    Fade,
    Dissolve,
    FadeBlack,
    WipeLeft,
    SlideLeft,
}

impl TransitionType {
    pub fn is_crossfade(&self) -> bool {
        !matches!(self, Self::Cut)
    }

    /// Имя перехода в фильтре xfade
    pub fn xfade_name(&self) -> Option<&'static str> {
        match self {
            Self::Cut => None,
            Self::Fade => Some("fade"),
            Self::Dissolve => Some("dissolve"),
            Self::FadeBlack => Some("fadeblack"),
            Self::WipeLeft => Some("wipeleft"),
            Self::SlideLeft => Some("slideleft"),
        }
    }
}

/// Соответствие говорящих и голосов синтеза
///
/// Заполняется один раз на проект и не меняется при перегенерации реплик.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VoiceIdentity {
    pub voices: BTreeMap<String, String>,
}

impl VoiceIdentity {
    pub fn voice_for(&self, speaker: &str) -> Option<&str> {
        self.voices.get(speaker).map(|v| v.as_str())
    }

    /// Назначить голоса говорящим, у которых их еще нет
    ///
    /// Существующие назначения не перезаписываются.
    pub fn resolve<'a>(&mut self, speakers: impl IntoIterator<Item = &'a str>, config: &VoiceConfig) {
        for speaker in speakers {
            if self.voices.contains_key(speaker) {
                continue;
            }
            let voice = if speaker == NARRATOR {
                config.narrator_voice.clone()
            } else {
                let assigned = self.voices.keys().filter(|k| k.as_str() != NARRATOR).count();
                config.pool[assigned % config.pool.len()].clone()
            };
            log::debug!("Voice for '{}' resolved to '{}'", speaker, voice);
            self.voices.insert(speaker.to_string(), voice);
        }
    }

    /// Проставить голоса в реплики
    pub fn apply(&self, lines: &mut [DialogueLine]) {
        for line in lines.iter_mut() {
            if let Some(voice) = self.voice_for(&line.speaker) {
                line.voice_id = Some(voice.to_string());
            }
        }
    }
}
