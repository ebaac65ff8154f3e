//! Компоновка клипов на итоговом таймлайне
//!
//! Переходы семейства crossfade сдвигают начало каждого следующего клипа назад
//! на длину перекрытия, а привязка к битам может сдвинуть его еще раньше.
//! Список фактических начал клипов - единственный источник синхронизации для
//! видеодорожки и аудиомикса: реплики, рассчитанные по плановым границам сцен,
//! переносятся на фактические границы перед сведением.

use log::debug;

use crate::config::CompositorConfig;
use crate::timeline::model::{planned_windows, BeatGrid, DialogueLine, Scene, TransitionType};
use crate::timeline::time::Millis;

/// Фактическое расположение клипов
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    /// Фактические начала клипов
    pub starts: Vec<Millis>,
    /// Плановые начала (стыковка встык)
    pub planned_starts: Vec<Millis>,
    /// Длительности клипов
    pub durations: Vec<Millis>,
    /// Длительность итогового видео
    pub total: Millis,
}

impl Composition {
    /// Длина перехода в клип `i` (0 для первого клипа и жестких склеек)
    pub fn overlap_before(&self, i: usize) -> Millis {
        if i == 0 || i >= self.starts.len() {
            return Millis::ZERO;
        }
        (self.starts[i - 1] + self.durations[i - 1] - self.starts[i]).clamp_non_negative()
    }

    /// Сдвиг клипа `i` относительно планового положения
    pub fn shift(&self, i: usize) -> Millis {
        self.starts[i] - self.planned_starts[i]
    }
}

/// Вычислить фактические начала клипов
pub fn compute_start_times(
    durations: &[Millis],
    transition: TransitionType,
    overlap: Millis,
    beat_grid: Option<&BeatGrid>,
    config: &CompositorConfig,
) -> Vec<Millis> {
    let mut starts = Vec::with_capacity(durations.len());
    for (i, _) in durations.iter().enumerate() {
        if i == 0 {
            starts.push(Millis::ZERO);
            continue;
        }
        let prev_end = starts[i - 1] + durations[i - 1];
        if !transition.is_crossfade() {
            starts.push(prev_end);
            continue;
        }

        let mut target = prev_end - overlap;
        if let Some(grid) = beat_grid {
            // Берем самый поздний бит в окне, чтобы сохранить как можно больше кадров
            if let Some(beat) = grid.latest_in(target - config.beat_snap_window, target) {
                debug!("Transition into clip {} snapped from {} to beat {}", i, target, beat);
                target = beat;
            }
        }
        starts.push(target.max(starts[i - 1]));
    }
    starts
}

/// Построить компоновку для списка сцен
pub fn compose(
    scenes: &[Scene],
    transition: TransitionType,
    beat_grid: Option<&BeatGrid>,
    config: &CompositorConfig,
) -> Composition {
    let durations: Vec<Millis> = scenes.iter().map(|s| s.duration).collect();
    let overlap = if transition.is_crossfade() { config.crossfade_overlap } else { Millis::ZERO };
    let starts = compute_start_times(&durations, transition, overlap, beat_grid, config);
    let planned_starts = planned_windows(scenes).iter().map(|w| w.start).collect();
    let total = match (starts.last(), durations.last()) {
        (Some(start), Some(duration)) => *start + *duration,
        _ => Millis::ZERO,
    };
    Composition { starts, planned_starts, durations, total }
}

/// Записать фактические начала в сцены
pub fn apply_to_scenes(scenes: &mut [Scene], composition: &Composition) {
    for (scene, start) in scenes.iter_mut().zip(&composition.starts) {
        scene.actual_start = Some(*start);
    }
}

/// Перенести слоты реплик с плановых границ сцен на фактические
pub fn remap_lines(lines: &[DialogueLine], scenes: &[Scene], composition: &Composition) -> Vec<DialogueLine> {
    lines
        .iter()
        .map(|line| {
            let mut remapped = line.clone();
            let idx = line.scene_id.and_then(|id| scenes.iter().position(|s| s.id == id));
            if let (Some(idx), Some(range)) = (idx, line.time_range) {
                remapped.time_range = Some(range.shifted(composition.shift(idx)));
            }
            remapped
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::time::TimeRange;

    fn secs(values: &[f64]) -> Vec<Millis> {
        values.iter().map(|v| Millis::from_secs_f64(*v)).collect()
    }

    #[test]
    fn hard_cuts_are_contiguous() {
        let starts = compute_start_times(
            &secs(&[4.0, 6.0, 8.0]),
            TransitionType::Cut,
            Millis::ZERO,
            None,
            &CompositorConfig::default(),
        );
        assert_eq!(starts, secs(&[0.0, 4.0, 10.0]));
    }

    #[test]
    fn crossfade_without_beats() {
        let scenes = vec![
            Scene::new(1, Millis::from_secs(4), ""),
            Scene::new(2, Millis::from_secs(4), ""),
            Scene::new(3, Millis::from_secs(8), ""),
        ];
        let composition = compose(&scenes, TransitionType::Fade, None, &CompositorConfig::default());
        assert_eq!(composition.starts, secs(&[0.0, 3.7, 7.4]));
        assert_eq!(composition.total, Millis::from_ms(15_400));
        assert_eq!(composition.overlap_before(1), Millis::from_ms(300));
        assert_eq!(composition.overlap_before(0), Millis::ZERO);
    }

    #[test]
    fn snaps_to_latest_beat_in_window() {
        let grid = BeatGrid {
            bpm: 120.0,
            beats: secs(&[1.0, 2.0, 2.5, 3.0, 3.9]),
            drop_time: None,
        };
        let starts = compute_start_times(
            &secs(&[4.0, 4.0]),
            TransitionType::Dissolve,
            Millis::from_ms(300),
            Some(&grid),
            &CompositorConfig::default(),
        );
        // Цель 3.7с, окно [1.7, 3.7]: последний бит 3.0, бит 3.9 вне окна
        assert_eq!(starts[1], Millis::from_secs(3));
    }

    #[test]
    fn no_beat_in_window_keeps_target() {
        let grid = BeatGrid { bpm: 90.0, beats: secs(&[0.5, 9.0]), drop_time: None };
        let starts = compute_start_times(
            &secs(&[6.0, 6.0]),
            TransitionType::Fade,
            Millis::from_ms(300),
            Some(&grid),
            &CompositorConfig::default(),
        );
        assert_eq!(starts[1], Millis::from_ms(5700));
    }

    #[test]
    fn lines_follow_their_scene_shift() {
        let scenes = vec![
            Scene::new(1, Millis::from_secs(4), ""),
            Scene::new(2, Millis::from_secs(4), ""),
            Scene::new(3, Millis::from_secs(8), ""),
        ];
        let composition = compose(&scenes, TransitionType::Fade, None, &CompositorConfig::default());
        let mut line = DialogueLine::new("Narrator", "Only today.").in_scene(3);
        line.time_range = Some(TimeRange::new(Millis::from_ms(8200), Millis::from_ms(9500)));

        let remapped = remap_lines(&[line], &scenes, &composition);
        assert_eq!(
            remapped[0].time_range,
            Some(TimeRange::new(Millis::from_ms(7600), Millis::from_ms(8900)))
        );
    }
}
