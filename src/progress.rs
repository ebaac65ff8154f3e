//! Модуль для отслеживания прогресса сборки
//!
//! Наблюдатели получают уведомления о текущем этапе и общем прогрессе,
//! рассчитанном по весам этапов.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Информация о прогрессе выполнения операции
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Текущий этап операции
    pub step: String,
    /// Процент выполнения текущего этапа (0.0 - 100.0)
    pub step_progress: f32,
    /// Общий процент выполнения всей операции (0.0 - 100.0)
    pub total_progress: f32,
    /// Дополнительная информация о текущем этапе
    pub details: Option<String>,
}

impl ProgressInfo {
    pub fn new(step: impl Into<String>, step_progress: f32, total_progress: f32, details: Option<String>) -> Self {
        Self {
            step: step.into(),
            step_progress: step_progress.clamp(0.0, 100.0),
            total_progress: total_progress.clamp(0.0, 100.0),
            details,
        }
    }
}

/// Наблюдатель, получающий уведомления о прогрессе
pub trait ProgressObserver: Send + Sync {
    fn on_progress_update(&self, progress: ProgressInfo);
}

/// Объект, рассылающий уведомления о прогрессе
pub trait ProgressReporter: Send + Sync {
    /// Добавить наблюдателя, возвращает его идентификатор
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize;

    /// Удалить наблюдателя по идентификатору
    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>>;

    /// Уведомить всех наблюдателей
    fn notify_progress(&self, progress: ProgressInfo);
}

/// Репортер, синхронно вызывающий наблюдателей
pub struct DefaultProgressReporter {
    observers: RwLock<HashMap<usize, Box<dyn ProgressObserver>>>,
    next_id: AtomicUsize,
}

impl DefaultProgressReporter {
    pub fn new() -> Self {
        Self { observers: RwLock::new(HashMap::new()), next_id: AtomicUsize::new(0) }
    }
}

impl Default for DefaultProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for DefaultProgressReporter {
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().insert(id, observer);
        id
    }

    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>> {
        self.observers.write().remove(&id)
    }

    fn notify_progress(&self, progress: ProgressInfo) {
        for observer in self.observers.read().values() {
            observer.on_progress_update(progress.clone());
        }
    }
}

/// Этапы сборки ролика
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStep {
    /// Подгонка длительностей сцен
    Reconcile,
    /// Распределение реплик по сценам
    Align,
    /// Генерация изображений
    Images,
    /// Генерация видеоклипов
    Videos,
    /// Синтез и подгонка озвучки
    Voiceover,
    /// Компоновка таймлайна
    Composite,
    /// Сведение звука
    Mix,
    /// Финальное кодирование
    Encode,
}

impl ProcessStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reconcile => "Подгонка длительностей сцен",
            Self::Align => "Распределение реплик",
            Self::Images => "Генерация изображений",
            Self::Videos => "Генерация видео",
            Self::Voiceover => "Озвучка",
            Self::Composite => "Компоновка таймлайна",
            Self::Mix => "Сведение звука",
            Self::Encode => "Кодирование",
        }
    }

    /// Вес этапа в процентах от всего процесса
    pub fn weight(&self) -> f32 {
        match self {
            Self::Reconcile => 2.0,
            Self::Align => 3.0,
            Self::Images => 15.0,
            Self::Videos => 45.0,
            Self::Voiceover => 15.0,
            Self::Composite => 2.0,
            Self::Mix => 8.0,
            Self::Encode => 10.0,
        }
    }
}

struct TrackerState {
    current_step: ProcessStep,
    step_progress: f32,
    total_progress: f32,
    completed_steps: HashMap<ProcessStep, f32>,
}

/// Трекер прогресса сборки
pub struct ProgressTracker {
    reporter: Option<Box<dyn ProgressReporter>>,
    state: RwLock<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            reporter: None,
            state: RwLock::new(TrackerState {
                current_step: ProcessStep::Reconcile,
                step_progress: 0.0,
                total_progress: 0.0,
                completed_steps: HashMap::new(),
            }),
        }
    }

    pub fn with_reporter(reporter: Box<dyn ProgressReporter>) -> Self {
        let mut tracker = Self::new();
        tracker.reporter = Some(reporter);
        tracker
    }

    pub fn set_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.reporter = Some(reporter);
    }

    /// Добавить наблюдателя (нужен репортер)
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> Option<usize> {
        self.reporter.as_mut().map(|reporter| reporter.add_observer(observer))
    }

    /// Установить текущий этап; предыдущий считается завершенным
    pub fn set_step(&self, step: ProcessStep) {
        {
            let mut state = self.state.write();
            if state.current_step == step {
                return;
            }
            let previous = state.current_step;
            state.completed_steps.insert(previous, 100.0);
            state.current_step = step;
            state.step_progress = 0.0;
            Self::recompute(&mut state);
        }
        self.report(None);
    }

    /// Обновить прогресс текущего этапа
    pub fn update_step_progress(&self, progress: f32, details: Option<String>) {
        {
            let mut state = self.state.write();
            state.step_progress = progress.clamp(0.0, 100.0);
            Self::recompute(&mut state);
        }
        self.report(details);
    }

    /// Отметить завершение всего процесса
    pub fn complete(&self) {
        {
            let mut state = self.state.write();
            let current = state.current_step;
            state.completed_steps.insert(current, 100.0);
            state.step_progress = 100.0;
            state.total_progress = 100.0;
        }
        self.report(Some("Сборка завершена".to_string()));
    }

    pub fn total_progress(&self) -> f32 {
        self.state.read().total_progress
    }

    fn recompute(state: &mut TrackerState) {
        let mut total = 0.0;
        let mut total_weight = 0.0;
        for (step, progress) in &state.completed_steps {
            if *step != state.current_step {
                total += step.weight() * progress / 100.0;
                total_weight += step.weight();
            }
        }
        total += state.current_step.weight() * state.step_progress / 100.0;
        total_weight += state.current_step.weight();
        state.total_progress = (total / total_weight * 100.0).clamp(0.0, 100.0);
    }

    fn report(&self, details: Option<String>) {
        if let Some(reporter) = &self.reporter {
            let info = {
                let state = self.state.read();
                ProgressInfo::new(state.current_step.as_str(), state.step_progress, state.total_progress, details)
            };
            reporter.notify_progress(info);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct TestObserver {
        updates: Arc<Mutex<Vec<ProgressInfo>>>,
    }

    impl ProgressObserver for TestObserver {
        fn on_progress_update(&self, progress: ProgressInfo) {
            self.updates.lock().push(progress);
        }
    }

    #[test]
    fn test_progress_tracker() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = DefaultProgressReporter::new();
        reporter.add_observer(Box::new(TestObserver { updates: updates.clone() }));
        let tracker = ProgressTracker::with_reporter(Box::new(reporter));

        tracker.update_step_progress(50.0, None);
        {
            let updates = updates.lock();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].step, ProcessStep::Reconcile.as_str());
            assert_eq!(updates[0].step_progress, 50.0);
            assert!(updates[0].total_progress > 0.0);
        }

        tracker.set_step(ProcessStep::Align);
        tracker.set_step(ProcessStep::Align);
        {
            let updates = updates.lock();
            assert_eq!(updates.len(), 2);
            assert_eq!(updates[1].step, ProcessStep::Align.as_str());
            assert_eq!(updates[1].step_progress, 0.0);
        }

        tracker.complete();
        let updates = updates.lock();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[2].total_progress, 100.0);
        assert_eq!(updates[2].details.as_deref(), Some("Сборка завершена"));
    }

    #[test]
    fn weights_cover_whole_process() {
        let steps = [
            ProcessStep::Reconcile,
            ProcessStep::Align,
            ProcessStep::Images,
            ProcessStep::Videos,
            ProcessStep::Voiceover,
            ProcessStep::Composite,
            ProcessStep::Mix,
            ProcessStep::Encode,
        ];
        let sum: f32 = steps.iter().map(|s| s.weight()).sum();
        assert!((sum - 100.0).abs() < f32::EPSILON);
    }
}
