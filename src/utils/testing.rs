//! Тестовые заменители внешних зависимостей

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AssemblyError, FailureKind, ProviderResult, Result};
use crate::media::probe::DurationProbe;
use crate::providers::{SpeechRequest, SpeechSynthesizer};
use crate::timeline::time::Millis;

/// Медиадвижок, который записывает вызовы и создает выходные файлы
pub struct RecordingEngine {
    runs: Mutex<Vec<Vec<String>>>,
    probes: AtomicUsize,
    /// Запуск завершается ошибкой, если среди аргументов есть подстрока
    fail_when: Vec<String>,
    duration: String,
    streams: String,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            fail_when: Vec::new(),
            duration: "0.0".to_string(),
            streams: "video\naudio\n".to_string(),
        }
    }

    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_when.push(pattern.to_string());
        self
    }

    pub fn with_duration(mut self, secs: &str) -> Self {
        self.duration = format!("{}\n", secs);
        self
    }

    pub fn with_streams(mut self, streams: &str) -> Self {
        self.streams = streams.to_string();
        self
    }

    pub fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().clone()
    }

    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::utils::ffmpeg::MediaEngine for RecordingEngine {
    async fn run(&self, args: &[String]) -> Result<()> {
        self.runs.lock().push(args.to_vec());
        if let Some(pattern) = self.fail_when.iter().find(|p| args.iter().any(|a| a.contains(p.as_str()))) {
            return Err(AssemblyError::MediaEngine(format!("scripted failure on '{}'", pattern)));
        }
        if let Some(output) = args.last() {
            std::fs::write(output, b"media")?;
        }
        Ok(())
    }

    async fn probe(&self, args: &[String]) -> Result<String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if args.iter().any(|a| a.contains("codec_type")) {
            Ok(self.streams.clone())
        } else {
            Ok(self.duration.clone())
        }
    }
}

/// Синтезатор, у которого длительность речи пропорциональна числу слов
pub struct WordRateSpeech {
    pub per_word: Millis,
    pub requests: Mutex<Vec<SpeechRequest>>,
    pub fail: Option<FailureKind>,
    /// Текст реплики, которую провайдер отклоняет
    pub rejects: Option<String>,
}

impl WordRateSpeech {
    pub fn new(per_word: Millis) -> Self {
        Self { per_word, requests: Mutex::new(Vec::new()), fail: None, rejects: None }
    }

    pub fn rejecting(per_word: Millis, text: &str) -> Self {
        Self { rejects: Some(text.to_string()), ..Self::new(per_word) }
    }

    pub fn failing(kind: FailureKind) -> Self {
        Self { fail: Some(kind), ..Self::new(Millis::ZERO) }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Длительность речи для текста
    pub fn spoken(&self, text: &str) -> Millis {
        self.per_word * crate::timeline::model::word_count(text) as i64
    }
}

#[async_trait]
impl SpeechSynthesizer for WordRateSpeech {
    fn name(&self) -> &str {
        "word-rate"
    }

    async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<PathBuf> {
        self.requests.lock().push(request.clone());
        if let Some(kind) = &self.fail {
            return Err(kind.clone());
        }
        if self.rejects.as_deref() == Some(request.text.as_str()) {
            return Err(FailureKind::Rejected(format!("voice policy: {}", request.text)));
        }
        std::fs::write(&request.output, request.text.as_bytes())
            .map_err(|e| FailureKind::Transient(e.to_string()))?;
        Ok(request.output.clone())
    }
}

/// Зонд, читающий длительность из текста, записанного `WordRateSpeech`
pub struct TextLengthProbe {
    pub per_word: Millis,
}

#[async_trait]
impl DurationProbe for TextLengthProbe {
    async fn duration(&self, path: &Path) -> Result<Millis> {
        let text = std::fs::read_to_string(path)?;
        Ok(self.per_word * crate::timeline::model::word_count(&text) as i64)
    }
}
