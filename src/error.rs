//! Модуль обработки ошибок библиотеки ad-assembly
//!
//! Этот модуль содержит типы ошибок, которые могут возникнуть при сборке ролика,
//! и типизированные отказы внешних провайдеров.

use std::time::Duration;
use thiserror::Error;

/// Причина отказа внешнего провайдера (изображения, видео, речь, сокращение текста)
///
/// Ожидаемые отказы провайдеров возвращаются как значения, а не как паника.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FailureKind {
    /// Превышен лимит запросов
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Временная ошибка (5xx, обрыв соединения)
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Истек общий таймаут задачи
    #[error("provider task timed out after {0:?}")]
    Timeout(Duration),

    /// Провайдер отклонил запрос (модерация, неверные параметры)
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// Провайдер недоступен или не сконфигурирован
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl FailureKind {
    /// Можно ли повторить запрос к тому же провайдеру
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Является ли отказ ограничением частоты запросов
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Результат вызова внешнего провайдера
pub type ProviderResult<T> = std::result::Result<T, FailureKind>;

/// Ошибки библиотеки ad-assembly
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Отказ провайдера, исчерпавший повторы и резервные провайдеры
    #[error("Provider error for {item}: {kind}")]
    Provider { item: String, kind: FailureKind },

    /// Часть сцен или реплик не сгенерирована, сборка продолжается без них
    #[error("Partial failure: {0}")]
    PartialFailure(String),

    /// Нарушена целостность: нет ни одного клипа или у обязательной реплики нет аудио
    #[error("Fatal integrity error: {0}")]
    FatalIntegrity(String),

    /// Все ступени лестницы качества завершились ошибкой
    #[error("Encoding failure: {0}")]
    EncodingFailure(String),

    /// Ошибка запуска медиадвижка (ffmpeg/ffprobe)
    #[error("Media engine error: {0}")]
    MediaEngine(String),

    /// Не удалось определить длительность аудио
    #[error("Audio probe error: {0}")]
    AudioProbe(String),

    /// Недопустимый переход между этапами
    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Другая ошибка
    #[error("Other error: {0}")]
    Other(String),
}

impl AssemblyError {
    /// Должна ли ошибка перевести проект в состояние `failed`
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PartialFailure(_))
    }
}

impl From<&str> for AssemblyError {
    fn from(s: &str) -> Self {
        AssemblyError::Other(s.to_string())
    }
}

impl From<String> for AssemblyError {
    fn from(s: String) -> Self {
        AssemblyError::Other(s)
    }
}

impl From<anyhow::Error> for AssemblyError {
    fn from(e: anyhow::Error) -> Self {
        AssemblyError::Other(format!("{:#}", e))
    }
}

impl From<hound::Error> for AssemblyError {
    fn from(e: hound::Error) -> Self {
        AssemblyError::AudioProbe(e.to_string())
    }
}

/// Тип Result для библиотеки ad-assembly
pub type Result<T> = std::result::Result<T, AssemblyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_are_retryable() {
        let kind = FailureKind::RateLimited { retry_after: Some(Duration::from_secs(3)) };
        assert!(kind.is_retryable());
        assert!(kind.is_rate_limit());
        assert!(kind.to_string().contains("retry after"));
        assert!(!FailureKind::Rejected("nsfw".into()).is_retryable());
    }

    #[test]
    fn partial_failure_is_not_fatal() {
        assert!(!AssemblyError::PartialFailure("scene 2".into()).is_fatal());
        assert!(AssemblyError::FatalIntegrity("no clips".into()).is_fatal());
    }
}
