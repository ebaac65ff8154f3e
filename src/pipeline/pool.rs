//! Ограниченный пул воркеров внутри этапа
//!
//! Все задачи запускаются сразу, семафор ограничивает число одновременно
//! выполняющихся. Результаты возвращаются с ключом задачи и объединяются
//! вызывающим кодом в одном потоке уже после барьера.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use log::error;
use tokio::sync::Semaphore;

/// Выполнить задачи с ограничением параллелизма
///
/// Порядок результатов совпадает с порядком задач.
pub async fn fan_out<K, T, F, Fut>(items: Vec<(K, T)>, concurrency: usize, worker: F) -> Vec<(K, Option<Fut::Output>)>
where
    K: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(K, T) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut keys = Vec::with_capacity(items.len());
    let mut handles = Vec::with_capacity(items.len());

    for (key, item) in items {
        let permit_source = Arc::clone(&semaphore);
        let task = worker(key.clone(), item);
        keys.push(key);
        handles.push(tokio::spawn(async move {
            // Семафор не закрывается, ошибка получения невозможна
            let _permit = permit_source.acquire_owned().await.ok();
            task.await
        }));
    }

    let results = join_all(handles).await;
    keys.into_iter()
        .zip(results)
        .map(|(key, joined)| match joined {
            Ok(output) => (key, Some(output)),
            Err(e) => {
                error!("Worker task panicked or was cancelled: {}", e);
                (key, None)
            }
        })
        .collect()
}
