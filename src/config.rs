//! Модуль конфигурации библиотеки ad-assembly
//!
//! Все настраиваемые пороги (паддинги реплик, параметры микса, лестница качества)
//! собраны в одной структуре `AssemblyConfig`, которая проверяется при создании
//! движка и передается ему явно.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AssemblyError, Result};
use crate::pipeline::stage::ProjectStatus;
use crate::timeline::model::CapacityTable;
use crate::timeline::time::Millis;

/// Настройки подгонки длительностей сцен
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Допустимые длительности клипа генератора, по возрастанию
    pub duration_tiers: Vec<Millis>,
    /// Допуск при сравнении суммы с целевой длительностью
    pub tolerance: Millis,
    /// Жесткий предел количества проходов
    pub max_passes: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            duration_tiers: vec![Millis::from_secs(4), Millis::from_secs(6), Millis::from_secs(8)],
            tolerance: Millis::from_secs(1),
            max_passes: 64,
        }
    }
}

/// Настройки распределения реплик по сценам
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Максимум реплик на сцену в зависимости от ее длительности
    pub capacity: CapacityTable,
    /// Отступ от начала сцены до первой реплики
    pub pad_in: Millis,
    /// Отступ от последней реплики до конца сцены
    pub pad_out: Millis,
    /// Пауза между соседними репликами
    pub line_gap: Millis,
    /// Темп речи для оценки длительности, слов в секунду
    pub words_per_second: f64,
    /// Постоянная добавка к оценке (вдох, атака)
    pub base_seconds: f64,
    /// Нижняя граница оценки длительности реплики
    pub min_estimate: Millis,
    /// Верхняя граница оценки длительности реплики
    pub max_estimate: Millis,
    /// Минимальный слот после масштабирования
    pub min_slot: Millis,
    /// Разрешать перенос лишней реплики в сцену, где персонаж не виден
    pub allow_offscreen_relocation: bool,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            capacity: CapacityTable::default(),
            pad_in: Millis::from_ms(150),
            pad_out: Millis::from_ms(200),
            line_gap: Millis::from_ms(150),
            words_per_second: 2.7,
            base_seconds: 0.2,
            min_estimate: Millis::from_ms(600),
            max_estimate: Millis::from_ms(3800),
            min_slot: Millis::from_ms(250),
            allow_offscreen_relocation: true,
        }
    }
}

/// Настройки регулятора длительности озвучки
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Относительный порог превышения слота
    pub over_ratio: f64,
    /// Абсолютный порог превышения слота
    pub over_seconds: Millis,
    /// Максимум попыток перегенерации на реплику
    pub max_retries: usize,
    /// Слот, считающийся очень коротким (снимаем вводный тег в скобках)
    pub tight_slot: Millis,
    /// Запас при расчете бюджета слов
    pub word_budget_safety: f64,
    /// Секунд слота на одно разрешенное окончание предложения
    pub seconds_per_sentence: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            over_ratio: 1.15,
            over_seconds: Millis::from_ms(350),
            max_retries: 2,
            tight_slot: Millis::from_ms(1600),
            word_budget_safety: 0.9,
            seconds_per_sentence: 2.0,
        }
    }
}

/// Настройки компоновки клипов
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Длительность перекрытия для переходов семейства crossfade
    pub crossfade_overlap: Millis,
    /// Окно поиска бита перед точкой перехода
    pub beat_snap_window: Millis,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            crossfade_overlap: Millis::from_ms(300),
            beat_snap_window: Millis::from_secs(2),
        }
    }
}

/// Настройки сведения аудио
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub sample_rate: u32,
    /// Фейды на краях реплики
    pub line_fade: Millis,
    /// Превышение слота, после которого включается сжатие по времени
    pub stretch_tolerance: Millis,
    /// Максимальный коэффициент ускорения речи (atempo)
    pub max_stretch: f64,
    pub dialogue_volume: f32,
    pub sfx_volume: f32,
    /// Доля длительности сцены, которую может занять звуковой эффект
    pub sfx_max_fraction: f64,
    /// Абсолютный предел длительности звукового эффекта
    pub sfx_max: Millis,
    pub sfx_fade: Millis,
    pub bed_volume: f32,
    pub bed_fade_out: Millis,
    /// Приглушать музыку под диалогом (sidechaincompress)
    pub ducking: bool,
    pub duck_threshold: f32,
    pub duck_ratio: f32,
    pub duck_attack_ms: u32,
    pub duck_release_ms: u32,
    /// Целевая интегральная громкость (LUFS)
    pub loudness_target: f32,
    /// Потолок true peak (dBTP)
    pub true_peak: f32,
    pub loudness_range: f32,
    /// Допустимое расхождение длительностей аудио и видео
    pub duration_tolerance: Millis,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            line_fade: Millis::from_ms(30),
            stretch_tolerance: Millis::from_ms(120),
            max_stretch: 1.25,
            dialogue_volume: 1.0,
            sfx_volume: 0.6,
            sfx_max_fraction: 0.5,
            sfx_max: Millis::from_ms(2500),
            sfx_fade: Millis::from_ms(80),
            bed_volume: 0.35,
            bed_fade_out: Millis::from_ms(800),
            ducking: true,
            duck_threshold: 0.05,
            duck_ratio: 8.0,
            duck_attack_ms: 20,
            duck_release_ms: 300,
            loudness_target: -16.0,
            true_peak: -1.5,
            loudness_range: 11.0,
            duration_tolerance: Millis::from_ms(50),
        }
    }
}

/// Одна ступень лестницы качества
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodePreset {
    pub name: String,
    pub video_codec: String,
    /// Пресет скорости x264
    pub speed: String,
    pub crf: u8,
    /// Ограничение потоков (None = на усмотрение кодера)
    pub threads: Option<u32>,
}

impl EncodePreset {
    pub fn new(name: &str, speed: &str, crf: u8, threads: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            video_codec: "libx264".to_string(),
            speed: speed.to_string(),
            crf,
            threads,
        }
    }
}

/// Настройки финального кодирования
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Пресеты от лучшего к самому надежному
    pub ladder: Vec<EncodePreset>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            ladder: vec![
                EncodePreset::new("high", "slow", 18, None),
                EncodePreset::new("balanced", "medium", 21, None),
                EncodePreset::new("fast", "veryfast", 24, None),
                EncodePreset::new("safe", "ultrafast", 28, Some(2)),
            ],
            width: 1080,
            height: 1920,
            fps: 30,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

/// Голоса синтеза речи
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub narrator_voice: String,
    /// Голоса для персонажей, выдаются по кругу в порядке первого появления
    pub pool: Vec<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            narrator_voice: "onyx".to_string(),
            pool: ["nova", "alloy", "echo", "fable", "shimmer"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }
}

/// Фиксированное ограниченное расписание повторов
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Множитель задержки для отказов по лимиту запросов
    pub rate_limit_multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            rate_limit_multiplier: 3,
        }
    }
}

/// Настройки конвейера этапов
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Размер пула воркеров внутри этапа
    pub concurrency: usize,
    /// Пауза между отправками видеозадач
    pub submit_stagger: Duration,
    /// Интервалы опроса видеозадач
    pub poll_backoff: BackoffPolicy,
    /// Повторы синхронных вызовов (изображения, речь)
    pub call_backoff: BackoffPolicy,
    /// Общий таймаут одной внешней задачи
    pub task_timeout: Duration,
    /// Остановиться после этого этапа для подтверждения
    pub pause_after: Option<ProjectStatus>,
    /// Рабочая директория для промежуточных файлов
    pub work_dir: Option<PathBuf>,
    /// Удалять промежуточные файлы после завершения
    pub cleanup_temp_files: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            submit_stagger: Duration::from_millis(500),
            poll_backoff: BackoffPolicy {
                initial: Duration::from_secs(5),
                max_delay: Duration::from_secs(30),
                max_attempts: 60,
                rate_limit_multiplier: 3,
            },
            call_backoff: BackoffPolicy::default(),
            task_timeout: Duration::from_secs(600),
            pause_after: None,
            work_dir: None,
            cleanup_temp_files: true,
        }
    }
}

/// Конфигурация библиотеки
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub reconcile: ReconcileConfig,
    pub align: AlignConfig,
    pub fit: FitConfig,
    pub compositor: CompositorConfig,
    pub mix: MixConfig,
    pub encode: EncodeConfig,
    pub voices: VoiceConfig,
    pub pipeline: PipelineConfig,
}

impl AssemblyConfig {
    /// Загрузить конфигурацию из JSON-файла и проверить ее
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AssemblyConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Проверить согласованность значений
    pub fn validate(&self) -> Result<()> {
        let tiers = &self.reconcile.duration_tiers;
        if tiers.is_empty() {
            return Err(invalid("reconcile.duration_tiers must not be empty"));
        }
        if tiers.iter().any(|t| *t <= Millis::ZERO) {
            return Err(invalid("reconcile.duration_tiers must be positive"));
        }
        if tiers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("reconcile.duration_tiers must be strictly ascending"));
        }
        if self.reconcile.tolerance <= Millis::ZERO {
            return Err(invalid("reconcile.tolerance must be positive"));
        }
        if self.reconcile.max_passes == 0 {
            return Err(invalid("reconcile.max_passes must be at least 1"));
        }

        let align = &self.align;
        if align.words_per_second <= 0.0 {
            return Err(invalid("align.words_per_second must be positive"));
        }
        if align.min_estimate > align.max_estimate {
            return Err(invalid("align.min_estimate must not exceed align.max_estimate"));
        }
        align.capacity.validate()?;

        if self.fit.over_ratio < 1.0 {
            return Err(invalid("fit.over_ratio must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.fit.word_budget_safety) || self.fit.word_budget_safety == 0.0 {
            return Err(invalid("fit.word_budget_safety must be in (0, 1]"));
        }

        if self.compositor.crossfade_overlap < Millis::ZERO {
            return Err(invalid("compositor.crossfade_overlap must not be negative"));
        }
        if self.compositor.crossfade_overlap >= tiers[0] {
            return Err(invalid("compositor.crossfade_overlap must be shorter than the shortest scene tier"));
        }

        // atempo принимает коэффициенты из диапазона [0.5, 2.0]
        if !(1.0..=2.0).contains(&self.mix.max_stretch) {
            return Err(invalid("mix.max_stretch must be within [1.0, 2.0]"));
        }
        if !(0.0..=1.0).contains(&self.mix.sfx_max_fraction) {
            return Err(invalid("mix.sfx_max_fraction must be within [0, 1]"));
        }
        if self.mix.sample_rate == 0 {
            return Err(invalid("mix.sample_rate must be positive"));
        }

        if self.encode.ladder.is_empty() {
            return Err(invalid("encode.ladder must contain at least one preset"));
        }
        if self.voices.narrator_voice.is_empty() || self.voices.pool.is_empty() {
            return Err(invalid("voices.narrator_voice and voices.pool must be set"));
        }
        if self.pipeline.concurrency == 0 {
            return Err(invalid("pipeline.concurrency must be at least 1"));
        }
        if self.pipeline.poll_backoff.max_attempts == 0 || self.pipeline.call_backoff.max_attempts == 0 {
            return Err(invalid("backoff max_attempts must be at least 1"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AssemblyError {
    AssemblyError::Configuration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AssemblyConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_unsorted_tiers() {
        let mut config = AssemblyConfig::default();
        config.reconcile.duration_tiers = vec![Millis::from_secs(6), Millis::from_secs(4)];
        assert!(matches!(config.validate(), Err(AssemblyError::Configuration(_))));
    }

    #[test]
    fn rejects_stretch_outside_atempo_range() {
        let mut config = AssemblyConfig::default();
        config.mix.max_stretch = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "fit": { "max_retries": 4 }, "pipeline": { "concurrency": 2 } }"#).unwrap();

        let config = AssemblyConfig::from_json_file(&path).unwrap();
        assert_eq!(config.fit.max_retries, 4);
        assert_eq!(config.fit.over_ratio, 1.15);
        assert_eq!(config.pipeline.concurrency, 2);
        assert_eq!(config.encode.ladder.len(), 4);
    }
}
