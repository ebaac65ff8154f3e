//! Упорядоченные списки провайдеров одной возможности

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};

use crate::config::BackoffPolicy;
use crate::error::{FailureKind, ProviderResult};
use crate::providers::backoff::retry_with_backoff;
use crate::providers::{ImageProvider, SceneRequest, SpeechRequest, SpeechSynthesizer};

/// Роль провайдера в списке
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Primary,
    Secondary,
}

/// Провайдер вместе с его ролью
pub struct ProviderSlot<P: ?Sized> {
    pub role: ProviderRole,
    pub provider: Arc<P>,
}

impl<P: ?Sized> Clone for ProviderSlot<P> {
    fn clone(&self) -> Self {
        Self { role: self.role, provider: Arc::clone(&self.provider) }
    }
}

/// Основной провайдер и необязательный резервный
pub struct ProviderChain<P: ?Sized> {
    slots: Vec<ProviderSlot<P>>,
}

impl<P: ?Sized> Clone for ProviderChain<P> {
    fn clone(&self) -> Self {
        Self { slots: self.slots.clone() }
    }
}

impl<P: ?Sized> ProviderChain<P> {
    pub fn new(primary: Arc<P>) -> Self {
        Self {
            slots: vec![ProviderSlot { role: ProviderRole::Primary, provider: primary }],
        }
    }

    /// Добавить резервного провайдера (заменяет предыдущего резервного)
    pub fn with_fallback(mut self, secondary: Arc<P>) -> Self {
        self.slots.retain(|slot| slot.role == ProviderRole::Primary);
        self.slots.push(ProviderSlot { role: ProviderRole::Secondary, provider: secondary });
        self
    }

    pub fn fallback(&self) -> Option<&Arc<P>> {
        self.slots
            .iter()
            .find(|slot| slot.role == ProviderRole::Secondary)
            .map(|slot| &slot.provider)
    }

    pub fn slots(&self) -> &[ProviderSlot<P>] {
        &self.slots
    }
}

impl ProviderChain<dyn SpeechSynthesizer> {
    /// Синтезировать реплику, переходя к резервному провайдеру после исчерпания повторов
    pub async fn synthesize(&self, request: &SpeechRequest, policy: &BackoffPolicy) -> ProviderResult<PathBuf> {
        let mut last = FailureKind::Unavailable("no speech provider configured".to_string());
        for slot in &self.slots {
            let provider = &slot.provider;
            let label = format!("speech[{}]", provider.name());
            match retry_with_backoff(policy, &label, || provider.synthesize(request)).await {
                Ok(path) => {
                    if slot.role == ProviderRole::Secondary {
                        info!("Speech synthesized by fallback provider {}", provider.name());
                    }
                    return Ok(path);
                }
                Err(failure) => {
                    warn!("Speech provider {} failed: {}", provider.name(), failure);
                    last = failure;
                }
            }
        }
        Err(last)
    }
}

impl ProviderChain<dyn ImageProvider> {
    /// Сгенерировать изображение сцены с переходом к резервному провайдеру
    pub async fn render(&self, request: &SceneRequest, policy: &BackoffPolicy) -> ProviderResult<PathBuf> {
        let mut last = FailureKind::Unavailable("no image provider configured".to_string());
        for slot in &self.slots {
            let provider = &slot.provider;
            let label = format!("image[{}] scene {}", provider.name(), request.scene_id);
            match retry_with_backoff(policy, &label, || provider.render(request)).await {
                Ok(path) => return Ok(path),
                Err(failure) => {
                    warn!("Image provider {} failed for scene {}: {}", provider.name(), request.scene_id, failure);
                    last = failure;
                }
            }
        }
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Flaky {
        name: &'static str,
        fail_with: Option<FailureKind>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for Flaky {
        fn name(&self) -> &str {
            self.name
        }

        async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(failure) => Err(failure.clone()),
                None => Ok(Path::new(self.name).join(&request.voice)),
            }
        }
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 2,
            rate_limit_multiplier: 2,
        }
    }

    fn request() -> SpeechRequest {
        SpeechRequest { text: "Hi.".into(), voice: "nova".into(), output: PathBuf::from("out.mp3") }
    }

    #[tokio::test]
    async fn falls_back_after_primary_exhausts_retries() {
        let primary = Arc::new(Flaky {
            name: "primary",
            fail_with: Some(FailureKind::Transient("500".into())),
            calls: AtomicUsize::new(0),
        });
        let secondary = Arc::new(Flaky { name: "secondary", fail_with: None, calls: AtomicUsize::new(0) });
        let primary_dyn: Arc<dyn SpeechSynthesizer> = primary.clone();
        let chain = ProviderChain::new(primary_dyn).with_fallback(secondary.clone() as Arc<dyn SpeechSynthesizer>);

        let path = chain.synthesize(&request(), &policy()).await.unwrap();

        assert_eq!(path, Path::new("secondary").join("nova"));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reports_last_failure_when_all_fail() {
        let only: Arc<dyn SpeechSynthesizer> = Arc::new(Flaky {
            name: "only",
            fail_with: Some(FailureKind::Rejected("voice".into())),
            calls: AtomicUsize::new(0),
        });
        let chain = ProviderChain::new(only);
        assert!(chain.fallback().is_none());
        let result = chain.synthesize(&request(), &policy()).await;
        assert_eq!(result, Err(FailureKind::Rejected("voice".into())));
    }
}
