//! Регулятор длительности озвучки
//!
//! Если синтезированная реплика заметно длиннее своего слота, текст сокращается
//! и реплика синтезируется заново тем же голосом. Число попыток ограничено;
//! исчерпание попыток не останавливает сборку.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::{BackoffPolicy, FitConfig};
use crate::error::{AssemblyError, Result};
use crate::media::probe::DurationProbe;
use crate::providers::{ProviderChain, ShortenRequest, SpeechRequest, SpeechSynthesizer, TextShortener};
use crate::timeline::model::DialogueLine;
use crate::timeline::time::Millis;
use crate::voiceover::shorten::shorten_locally;

/// Итог регулировки одной реплики
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    /// Реплика укладывается в слот, вызовов провайдеров не было
    Accepted,
    /// Реплика сокращена и перегенерирована
    Refitted { attempts: usize },
    /// Попытки исчерпаны, реплика оставлена как есть
    Exhausted { attempts: usize },
}

/// Превышает ли измеренная длительность слот настолько, что нужна перегенерация
///
/// Должны выполняться оба условия: относительное и абсолютное превышение.
pub fn needs_refit(slot: Millis, measured: Millis, config: &FitConfig) -> bool {
    let relative = measured.as_secs_f64() > slot.as_secs_f64() * config.over_ratio;
    let absolute = measured > slot + config.over_seconds;
    relative && absolute
}

/// Бюджет слов для сокращенного текста
pub fn word_budget(words: usize, slot: Millis, measured: Millis, config: &FitConfig) -> usize {
    if measured <= Millis::ZERO {
        return words.max(1);
    }
    let ratio = slot.as_secs_f64() / measured.as_secs_f64();
    ((words as f64 * ratio * config.word_budget_safety).floor() as usize).max(1)
}

/// Сколько концов предложений допускается в слоте
pub fn sentence_budget(slot: Millis, config: &FitConfig) -> usize {
    ((slot.as_secs_f64() / config.seconds_per_sentence).floor() as usize).max(1)
}

/// Регулятор длительности озвучки
pub struct FitRegulator {
    config: FitConfig,
    speech: ProviderChain<dyn SpeechSynthesizer>,
    shortener: Option<Arc<dyn TextShortener>>,
    probe: Arc<dyn DurationProbe>,
    backoff: BackoffPolicy,
}

impl FitRegulator {
    pub fn new(
        config: FitConfig,
        speech: ProviderChain<dyn SpeechSynthesizer>,
        shortener: Option<Arc<dyn TextShortener>>,
        probe: Arc<dyn DurationProbe>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self { config, speech, shortener, probe, backoff }
    }

    /// Проверить реплику и при необходимости сократить и перегенерировать ее
    ///
    /// Реплика без слота или без аудио принимается без изменений. Голос берется
    /// из `voice_id` реплики; его отсутствие при нужной перегенерации - ошибка.
    pub async fn regulate(&self, line: &mut DialogueLine) -> Result<FitOutcome> {
        let (slot, audio_path) = match (line.slot(), line.audio_path.clone()) {
            (Some(slot), Some(path)) => (slot, path),
            _ => return Ok(FitOutcome::Accepted),
        };

        let mut measured = match line.measured_duration {
            Some(measured) => measured,
            None => {
                let measured = self.probe.duration(&audio_path).await?;
                line.measured_duration = Some(measured);
                measured
            }
        };

        if !needs_refit(slot, measured, &self.config) {
            return Ok(FitOutcome::Accepted);
        }

        // Голос фиксируется один раз до начала попыток
        let voice = line.voice_id.clone().ok_or_else(|| {
            AssemblyError::Configuration(format!("no voice resolved for speaker '{}'", line.speaker))
        })?;

        info!(
            "Line '{}' runs {} in a {} slot, refitting",
            line.text, measured, slot
        );

        for attempt in 1..=self.config.max_retries {
            let candidate = self.shorter_text(&line.text, slot, measured).await;
            if candidate.trim() == line.text.trim() || candidate.trim().is_empty() {
                warn!("Line '{}' cannot be shortened further", line.text);
                return Ok(FitOutcome::Exhausted { attempts: attempt - 1 });
            }

            let output = refit_path(&audio_path, attempt);
            let request = SpeechRequest { text: candidate.clone(), voice: voice.clone(), output };
            let path = match self.speech.synthesize(&request, &self.backoff).await {
                Ok(path) => path,
                Err(failure) => {
                    warn!("Regeneration of '{}' failed: {}; keeping previous audio", candidate, failure);
                    return Ok(FitOutcome::Exhausted { attempts: attempt });
                }
            };
            measured = self.probe.duration(&path).await?;
            debug!("Attempt {}: '{}' measures {}", attempt, candidate, measured);

            line.text = candidate;
            line.audio_path = Some(path);
            line.measured_duration = Some(measured);

            if !needs_refit(slot, measured, &self.config) {
                info!("Line refitted after {} attempt(s): '{}' ({})", attempt, line.text, measured);
                return Ok(FitOutcome::Refitted { attempts: attempt });
            }
        }

        warn!(
            "Line '{}' still runs {} in a {} slot after {} attempts",
            line.text, measured, slot, self.config.max_retries
        );
        Ok(FitOutcome::Exhausted { attempts: self.config.max_retries })
    }

    /// Отрегулировать все реплики по очереди
    pub async fn regulate_all(&self, lines: &mut [DialogueLine]) -> Result<Vec<FitOutcome>> {
        let mut outcomes = Vec::with_capacity(lines.len());
        for line in lines.iter_mut() {
            outcomes.push(self.regulate(line).await?);
        }
        Ok(outcomes)
    }

    /// Запросить сокращение у внешнего сокращателя, иначе сократить локально
    async fn shorter_text(&self, text: &str, slot: Millis, measured: Millis) -> String {
        let words = crate::timeline::model::word_count(text);
        let max_words = word_budget(words, slot, measured, &self.config);
        let max_sentence_endings = sentence_budget(slot, &self.config);

        if let Some(shortener) = &self.shortener {
            let request = ShortenRequest {
                text: text.to_string(),
                slot_seconds: slot.as_secs_f64(),
                max_words,
                max_sentence_endings,
            };
            match shortener.shorten(&request).await {
                Ok(Some(shorter)) if shorter.trim() != text.trim() && !shorter.trim().is_empty() => {
                    return shorter.trim().to_string();
                }
                Ok(_) => debug!("Shortener returned nothing new, using local rules"),
                Err(failure) => warn!("Shortener failed ({}), using local rules", failure),
            }
        }

        shorten_locally(text, slot, max_words, max_sentence_endings, &self.config)
    }
}

/// Путь для перегенерированной версии реплики
fn refit_path(original: &Path, attempt: usize) -> PathBuf {
    let stem = original.file_stem().and_then(|s| s.to_str()).unwrap_or("line");
    let ext = original.extension().and_then(|e| e.to_str()).unwrap_or("mp3");
    original.with_file_name(format!("{}_fit{}.{}", stem, attempt, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, ProviderResult};
    use crate::timeline::time::TimeRange;
    use crate::utils::testing::{TextLengthProbe, WordRateSpeech};
    use async_trait::async_trait;
    use std::time::Duration;

    const PER_WORD: Millis = Millis::from_ms(400);

    fn backoff() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 1,
            rate_limit_multiplier: 1,
        }
    }

    fn regulator(
        speech: Arc<WordRateSpeech>,
        shortener: Option<Arc<dyn TextShortener>>,
    ) -> FitRegulator {
        let speech_dyn: Arc<dyn SpeechSynthesizer> = speech;
        FitRegulator::new(
            FitConfig::default(),
            ProviderChain::new(speech_dyn),
            shortener,
            Arc::new(TextLengthProbe { per_word: PER_WORD }),
            backoff(),
        )
    }

    fn synthesized_line(dir: &Path, text: &str, slot: Millis) -> DialogueLine {
        let path = dir.join("line_0.mp3");
        std::fs::write(&path, text).unwrap();
        let mut line = DialogueLine::new("Maya", text);
        line.time_range = Some(TimeRange::new(Millis::from_secs(1), Millis::from_secs(1) + slot));
        line.voice_id = Some("nova".to_string());
        line.audio_path = Some(path);
        line.measured_duration = Some(PER_WORD * crate::timeline::model::word_count(text) as i64);
        line
    }

    struct EchoShortener;

    #[async_trait]
    impl TextShortener for EchoShortener {
        async fn shorten(&self, request: &ShortenRequest) -> ProviderResult<Option<String>> {
            Ok(Some(request.text.clone()))
        }
    }

    struct FailingShortener;

    #[async_trait]
    impl TextShortener for FailingShortener {
        async fn shorten(&self, _request: &ShortenRequest) -> ProviderResult<Option<String>> {
            Err(FailureKind::Unavailable("offline".into()))
        }
    }

    #[test]
    fn refit_requires_both_thresholds() {
        let config = FitConfig::default();
        // Порог для слота 1.6с: больше 1.84с и больше 1.95с
        assert!(needs_refit(Millis::from_ms(1600), Millis::from_ms(2000), &config));
        assert!(!needs_refit(Millis::from_ms(1600), Millis::from_ms(1900), &config));
        // Длинный слот: относительное превышение мало
        assert!(!needs_refit(Millis::from_secs(10), Millis::from_ms(10_500), &config));
    }

    #[test]
    fn budgets_have_a_floor_of_one() {
        let config = FitConfig::default();
        assert_eq!(word_budget(10, Millis::from_secs(2), Millis::from_secs(4), &config), 4);
        assert_eq!(word_budget(1, Millis::from_ms(100), Millis::from_secs(4), &config), 1);
        assert_eq!(sentence_budget(Millis::from_ms(1500), &config), 1);
        assert_eq!(sentence_budget(Millis::from_ms(4100), &config), 2);
    }

    #[tokio::test]
    async fn fitting_line_makes_no_provider_calls() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(WordRateSpeech::new(PER_WORD));
        let regulator = regulator(speech.clone(), None);
        let mut line = synthesized_line(dir.path(), "Hello world.", Millis::from_secs(2));
        let before = line.clone();

        let outcome = regulator.regulate(&mut line).await.unwrap();

        assert_eq!(outcome, FitOutcome::Accepted);
        assert_eq!(speech.calls(), 0);
        assert_eq!(line, before);
    }

    #[tokio::test]
    async fn overrunning_line_is_shortened_with_same_voice() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(WordRateSpeech::new(PER_WORD));
        let regulator = regulator(speech.clone(), Some(Arc::new(EchoShortener)));
        let text = "Fresh beans, roasted daily, delivered to your door before sunrise.";
        let mut line = synthesized_line(dir.path(), text, Millis::from_secs(2));

        let outcome = regulator.regulate(&mut line).await.unwrap();

        assert!(matches!(outcome, FitOutcome::Refitted { .. }));
        assert!(line.measured_duration.unwrap() <= Millis::from_ms(2350));
        assert_ne!(line.text, text);
        let requests = speech.requests.lock();
        assert!(!requests.is_empty());
        assert!(requests.iter().all(|r| r.voice == "nova"));
        assert_eq!(line.voice_id.as_deref(), Some("nova"));
    }

    #[tokio::test]
    async fn exhausts_when_text_cannot_shrink() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(WordRateSpeech::new(PER_WORD));
        let regulator = regulator(speech.clone(), Some(Arc::new(FailingShortener)));
        // Одно длинное слово нельзя сократить
        let mut line = synthesized_line(dir.path(), "Supercalifragilistic.", Millis::from_ms(100));
        line.measured_duration = Some(Millis::from_secs(2));

        let outcome = regulator.regulate(&mut line).await.unwrap();

        assert_eq!(outcome, FitOutcome::Exhausted { attempts: 0 });
        assert_eq!(speech.calls(), 0);
    }

    #[tokio::test]
    async fn missing_voice_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let regulator = regulator(Arc::new(WordRateSpeech::new(PER_WORD)), None);
        let mut line = synthesized_line(dir.path(), "One two three four five six seven.", Millis::from_secs(1));
        line.voice_id = None;

        let err = regulator.regulate(&mut line).await.unwrap_err();
        assert!(matches!(err, AssemblyError::Configuration(_)));
    }

    #[tokio::test]
    async fn provider_failure_keeps_previous_audio() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(WordRateSpeech::failing(FailureKind::Rejected("voice".into())));
        let regulator = regulator(speech, None);
        let mut line = synthesized_line(dir.path(), "One two three four five six seven.", Millis::from_secs(1));
        let before = line.clone();

        let outcome = regulator.regulate(&mut line).await.unwrap();

        assert_eq!(outcome, FitOutcome::Exhausted { attempts: 1 });
        assert_eq!(line, before);
    }
}
