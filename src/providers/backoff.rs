//! Повторы вызовов провайдеров по фиксированному ограниченному расписанию

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};

use crate::config::BackoffPolicy;
use crate::error::{FailureKind, ProviderResult};

impl BackoffPolicy {
    /// Задержка перед повтором номер `attempt` (с нуля) после отказа `failure`
    ///
    /// Отказы по лимиту запросов ждут дольше обычных.
    pub fn delay_for(&self, attempt: u32, failure: &FailureKind) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let base = self.initial.saturating_mul(factor).min(self.max_delay);
        match failure {
            FailureKind::RateLimited { retry_after } => {
                let multiplier = self.rate_limit_multiplier.max(1);
                let ceiling = self.max_delay.saturating_mul(multiplier);
                let longer = base.saturating_mul(multiplier).min(ceiling);
                // Подсказка провайдера не выводит задержку за потолок расписания
                retry_after.map(|hint| hint.max(longer).min(ceiling)).unwrap_or(longer)
            }
            _ => base,
        }
    }

    /// Задержки опроса (без учета отказов)
    pub fn poll_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial.saturating_mul(factor).min(self.max_delay)
    }
}

/// Выполнить операцию с повторами для повторяемых отказов
///
/// Неповторяемые отказы (`Rejected`, `Unavailable`, `Timeout`) возвращаются сразу.
pub async fn retry_with_backoff<T, F, Fut>(policy: &BackoffPolicy, label: &str, mut op: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt, &failure);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    label,
                    attempt + 1,
                    policy.max_attempts,
                    failure,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(failure) => {
                debug!("{}: giving up after {} attempts: {}", label, attempt + 1, failure);
                return Err(failure);
            }
        }
    }
}
