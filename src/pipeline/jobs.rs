//! Двухфазная генерация видеоклипов
//!
//! Фаза 1 отправляет задачи по всем сценам с паузой между отправками; если
//! основной провайдер не принял задачу, она сразу отправляется резервному.
//! Фаза 2 опрашивает все задачи параллельно. Ошибка опроса или таймаут
//! запускают резервную генерацию только для этой задачи.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::config::{BackoffPolicy, PipelineConfig};
use crate::error::{FailureKind, ProviderResult};
use crate::providers::backoff::retry_with_backoff;
use crate::providers::{ProviderChain, ProviderRole, SceneRequest, TaskHandle, TaskStatus, VideoProvider};

/// Принятая провайдером задача
struct Submitted {
    request: SceneRequest,
    handle: TaskHandle,
    provider: Arc<dyn VideoProvider>,
    role: ProviderRole,
}

/// Результат генерации клипа для сцены
pub type ClipResult = (u32, ProviderResult<PathBuf>);

/// Отправить задачу провайдеру с повторами
async fn submit_to(
    provider: &Arc<dyn VideoProvider>,
    request: &SceneRequest,
    policy: &BackoffPolicy,
) -> ProviderResult<TaskHandle> {
    let label = format!("video submit[{}] scene {}", provider.name(), request.scene_id);
    retry_with_backoff(policy, &label, || provider.submit(request)).await
}

/// Опрашивать задачу до готовности
///
/// Интервалы растут по `policy.poll_delay`; число опросов ограничено
/// `policy.max_attempts`.
pub async fn poll_until_done(
    provider: &dyn VideoProvider,
    handle: &TaskHandle,
    policy: &BackoffPolicy,
) -> ProviderResult<PathBuf> {
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        let delay = match provider.poll(handle).await {
            Ok(TaskStatus::Done(path)) => return Ok(path),
            Ok(TaskStatus::Failed(reason)) => return Err(FailureKind::Rejected(reason)),
            Ok(TaskStatus::Pending) => policy.poll_delay(attempt),
            Err(failure) if failure.is_retryable() => {
                debug!("Poll of task {} failed ({}), will retry", handle.id, failure);
                policy.delay_for(attempt, &failure)
            }
            Err(failure) => return Err(failure),
        };
        attempt += 1;
        if attempt >= policy.max_attempts {
            debug!("Task {} still not done after {} polls", handle.id, attempt);
            return Err(FailureKind::Timeout(started.elapsed()));
        }
        tokio::time::sleep(delay).await;
    }
}

/// Опрос с общим таймаутом задачи
async fn poll_with_timeout(
    provider: &dyn VideoProvider,
    handle: &TaskHandle,
    config: &PipelineConfig,
) -> ProviderResult<PathBuf> {
    match tokio::time::timeout(config.task_timeout, poll_until_done(provider, handle, &config.poll_backoff)).await {
        Ok(result) => result,
        Err(_) => Err(FailureKind::Timeout(config.task_timeout)),
    }
}

/// Сгенерировать клипы для всех сцен
///
/// Возвращает результат по каждой сцене в порядке запросов. Отказ одной сцены
/// не влияет на остальные.
pub async fn generate_clips(
    requests: Vec<SceneRequest>,
    chain: &ProviderChain<dyn VideoProvider>,
    config: &PipelineConfig,
) -> Vec<ClipResult> {
    let total = requests.len();
    info!("Submitting {} video tasks", total);

    // Фаза 1: отправка
    let mut submitted: Vec<Result<Submitted, (u32, FailureKind)>> = Vec::with_capacity(total);
    for (i, request) in requests.into_iter().enumerate() {
        if i > 0 && !config.submit_stagger.is_zero() {
            tokio::time::sleep(config.submit_stagger).await;
        }
        submitted.push(submit_scene(request, chain, &config.call_backoff).await);
    }

    // Фаза 2: параллельный опрос
    let polls = submitted.into_iter().map(move |entry| async move {
        match entry {
            Ok(task) => finish_task(task, chain, config).await,
            Err((scene_id, failure)) => (scene_id, Err(failure)),
        }
    });
    let results = join_all(polls).await;

    let done = results.iter().filter(|(_, r)| r.is_ok()).count();
    info!("Video generation finished: {}/{} clips", done, total);
    results
}

async fn submit_scene(
    request: SceneRequest,
    chain: &ProviderChain<dyn VideoProvider>,
    policy: &BackoffPolicy,
) -> Result<Submitted, (u32, FailureKind)> {
    let mut last = FailureKind::Unavailable("no video provider configured".to_string());
    for slot in chain.slots() {
        match submit_to(&slot.provider, &request, policy).await {
            Ok(handle) => {
                debug!("Scene {} submitted to {} as {}", request.scene_id, slot.provider.name(), handle.id);
                return Ok(Submitted { request, handle, provider: Arc::clone(&slot.provider), role: slot.role });
            }
            Err(failure) => {
                warn!("Submit of scene {} to {} failed: {}", request.scene_id, slot.provider.name(), failure);
                last = failure;
            }
        }
    }
    Err((request.scene_id, last))
}

async fn finish_task(task: Submitted, chain: &ProviderChain<dyn VideoProvider>, config: &PipelineConfig) -> ClipResult {
    let scene_id = task.request.scene_id;
    let failure = match poll_with_timeout(task.provider.as_ref(), &task.handle, config).await {
        Ok(path) => return (scene_id, Ok(path)),
        Err(failure) => failure,
    };
    warn!("Task {} for scene {} failed: {}", task.handle.id, scene_id, failure);

    let fallback = match (task.role, chain.fallback()) {
        (ProviderRole::Primary, Some(fallback)) => Arc::clone(fallback),
        _ => return (scene_id, Err(failure)),
    };

    info!("Retrying scene {} with fallback provider {}", scene_id, fallback.name());
    let handle = match submit_to(&fallback, &task.request, &config.call_backoff).await {
        Ok(handle) => handle,
        Err(e) => return (scene_id, Err(e)),
    };
    (scene_id, poll_with_timeout(fallback.as_ref(), &handle, config).await)
}
