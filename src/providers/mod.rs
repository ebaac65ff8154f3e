//! # Providers
//!
//! Внешние генераторы (изображения, видео, речь, сокращение текста) видны движку
//! только как фиксированные интерфейсы возможностей. Конкретные HTTP-клиенты
//! живут вне библиотеки и подключаются через эти трейты.
//!
//! Для каждой возможности задается короткий упорядоченный список провайдеров
//! (`ProviderChain`): основной и резервный.

pub mod backoff;
pub mod chain;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::timeline::time::Millis;

pub use backoff::retry_with_backoff;
pub use chain::{ProviderChain, ProviderRole, ProviderSlot};

/// Запрос на генерацию изображения или клипа для сцены
#[derive(Debug, Clone, PartialEq)]
pub struct SceneRequest {
    pub scene_id: u32,
    pub subject: String,
    pub motion: Option<String>,
    pub duration: Millis,
    /// Опорный кадр для image-to-video
    pub image_path: Option<PathBuf>,
    /// Куда сохранить результат
    pub output_dir: PathBuf,
}

/// Идентификатор отправленной асинхронной задачи
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
    /// Имя провайдера, принявшего задачу
    pub provider: String,
}

/// Состояние асинхронной задачи
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Pending,
    Done(PathBuf),
    Failed(String),
}

/// Генерация изображения сцены
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, request: &SceneRequest) -> ProviderResult<PathBuf>;
}

/// Асинхронная генерация клипа: отправка и опрос
#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &SceneRequest) -> ProviderResult<TaskHandle>;

    async fn poll(&self, task: &TaskHandle) -> ProviderResult<TaskStatus>;
}

/// Запрос на синтез реплики
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// Голос, уже закрепленный за говорящим
    pub voice: String,
    pub output: PathBuf,
}

/// Синтез речи
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<PathBuf>;
}

/// Запрос на сокращение текста реплики
#[derive(Debug, Clone, PartialEq)]
pub struct ShortenRequest {
    pub text: String,
    pub slot_seconds: f64,
    pub max_words: usize,
    pub max_sentence_endings: usize,
}

/// Сокращение текста (например, через LLM); `None` - сократить не удалось
#[async_trait]
pub trait TextShortener: Send + Sync {
    async fn shorten(&self, request: &ShortenRequest) -> ProviderResult<Option<String>>;
}
