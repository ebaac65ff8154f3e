//! Распределение реплик по сценам
//!
//! Каждая реплика попадает ровно в одну сцену и получает слот `[start, end)`,
//! лежащий внутри окна этой сцены. Слоты внутри сцены не перекрываются, а
//! количество реплик в сцене ограничено таблицей вместимости.
//!
//! Этапы:
//! 1. Приведение имен говорящих к каноническому виду
//! 2. Поиск сцен, в кадре которых виден говорящий
//! 3. Назначение сцены по приоритетам (явная сцена, подсказка времени, свободная сцена-кандидат)
//! 4. Перенос лишних реплик из переполненных сцен в ближайшие свободные
//! 5. Упаковка слотов внутри сцены по оценке длительности речи
//! 6. Глобальная сортировка по времени начала

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::config::AlignConfig;
use crate::timeline::model::{planned_windows, DialogueLine, Scene};
use crate::timeline::speaker;
use crate::timeline::time::{Millis, TimeRange};

/// Перенос реплики из переполненной сцены
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub speaker: String,
    pub text: String,
    pub from_scene: u32,
    pub to_scene: u32,
    /// Говорящий не виден в сцене назначения
    pub offscreen: bool,
}

/// Сцена, оставшаяся переполненной после всех попыток переноса
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overflow {
    pub scene_id: u32,
    pub lines: usize,
    pub capacity: usize,
}

/// Итог выравнивания
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignReport {
    pub relocated: Vec<Relocation>,
    pub overflow: Vec<Overflow>,
}

/// Оценка длительности произнесения по количеству слов
pub fn estimate_speech(words: usize, config: &AlignConfig) -> Millis {
    let secs = words as f64 / config.words_per_second + config.base_seconds;
    let estimate = Millis::from_secs_f64(secs);
    estimate.max(config.min_estimate).min(config.max_estimate)
}

/// Разложить слоты реплик внутри окна сцены
///
/// Все оценки масштабируются одним коэффициентом (только в сторону уменьшения),
/// затем применяется нижняя граница слота; если она снова вывела сумму за
/// бюджет, слоты сжимаются еще раз уже без нижней границы.
pub fn pack_scene(window: TimeRange, estimates: &[Millis], config: &AlignConfig) -> Vec<TimeRange> {
    let k = estimates.len();
    if k == 0 {
        return Vec::new();
    }

    let mut pad_in = config.pad_in;
    let mut gap = config.line_gap;
    let mut usable = window.duration() - config.pad_in - config.pad_out - gap * (k as i64 - 1);
    if usable <= Millis::ZERO {
        // Отступы не помещаются: используем окно целиком
        pad_in = Millis::ZERO;
        gap = Millis::ZERO;
        usable = window.duration();
    }

    let sum: Millis = estimates.iter().sum();
    let factor = if sum > usable && sum > Millis::ZERO {
        usable.as_ms() as f64 / sum.as_ms() as f64
    } else {
        1.0
    };

    let mut slots: Vec<Millis> = estimates
        .iter()
        .map(|e| e.scale_floor(factor).max(config.min_slot))
        .collect();

    let floored: Millis = slots.iter().sum();
    if floored > usable && floored > Millis::ZERO {
        let shrink = usable.as_ms() as f64 / floored.as_ms() as f64;
        for slot in slots.iter_mut() {
            *slot = slot.scale_floor(shrink);
        }
    }

    let mut cursor = window.start + pad_in;
    slots
        .into_iter()
        .map(|slot| {
            let range = TimeRange::new(cursor, cursor + slot);
            cursor = range.end + gap;
            range
        })
        .collect()
}

/// Сцена, в окно которой попадает момент `t`
fn scene_at(windows: &[TimeRange], t: Millis) -> usize {
    if let Some(idx) = windows.iter().position(|w| w.contains(t)) {
        return idx;
    }
    if t < Millis::ZERO {
        0
    } else {
        windows.len() - 1
    }
}

/// Индексы сцен, упорядоченные по расстоянию от `from` (вперед раньше, чем назад)
fn neighbours(from: usize, n: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(n.saturating_sub(1));
    for d in 1..n {
        if from + d < n {
            order.push(from + d);
        }
        if d <= from {
            order.push(from - d);
        }
    }
    order
}

/// Распределить реплики по сценам и упаковать их слоты
///
/// При `freeze_speakers` имена говорящих не переписываются, а реплики с
/// действующим `scene_id` закреплены: повторный запуск меняет только тайминг.
pub fn align_dialogue(
    scenes: &[Scene],
    lines: &mut Vec<DialogueLine>,
    characters: &[String],
    freeze_speakers: bool,
    config: &AlignConfig,
) -> AlignReport {
    let mut report = AlignReport::default();
    if scenes.is_empty() {
        warn!("No scenes to align {} dialogue lines into", lines.len());
        return report;
    }
    if lines.is_empty() {
        return report;
    }

    let windows = planned_windows(scenes);
    let n_scenes = scenes.len();
    let n_lines = lines.len();
    let index_of: HashMap<u32, usize> = scenes.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    let capacity: Vec<usize> = scenes.iter().map(|s| config.capacity.max_lines(s.duration)).collect();
    let hints: Vec<Option<TimeRange>> = lines.iter().map(|l| l.time_range).collect();

    // 1. Канонические имена
    if !freeze_speakers {
        for line in lines.iter_mut() {
            let canonical = speaker::canonicalize(&line.speaker, characters);
            if canonical != line.speaker {
                debug!("Speaker '{}' canonicalized to '{}'", line.speaker, canonical);
                line.speaker = canonical;
            }
        }
    }

    // 2. Сцены-кандидаты
    let candidates: Vec<Vec<usize>> = lines
        .iter()
        .map(|line| {
            if line.is_narrator() {
                (0..n_scenes).collect()
            } else {
                (0..n_scenes).filter(|&s| scenes[s].mentions(&line.speaker)).collect()
            }
        })
        .collect();
    let compatible = |line: usize, scene: usize| candidates[line].contains(&scene);

    // 3. Назначение
    let mut assigned: Vec<usize> = vec![0; n_lines];
    let mut sequence: Vec<usize> = vec![0; n_lines];
    let mut pinned: Vec<bool> = vec![false; n_lines];
    let mut counts: Vec<usize> = vec![0; n_scenes];
    let mut next_seq = 0usize;
    let mut pending = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        match line.scene_id.and_then(|id| index_of.get(&id).copied()) {
            Some(s) => {
                assigned[i] = s;
                sequence[i] = next_seq;
                next_seq += 1;
                pinned[i] = freeze_speakers;
                counts[s] += 1;
            }
            None => {
                if let Some(id) = line.scene_id {
                    warn!("Line {} references unknown scene {}, reassigning", i, id);
                }
                pending.push(i);
            }
        }
    }

    for i in pending {
        let is_narrator = lines[i].is_narrator();
        let from_hint = hints[i]
            .map(|hint| scene_at(&windows, hint.start))
            .filter(|&s| is_narrator || compatible(i, s));

        let scene = from_hint
            .or_else(|| candidates[i].iter().copied().find(|&s| counts[s] < capacity[s]))
            .or_else(|| {
                candidates[i]
                    .iter()
                    .copied()
                    .min_by_key(|&s| (counts[s] + 1).saturating_sub(capacity[s]))
            })
            .unwrap_or_else(|| (i * n_scenes / n_lines).min(n_scenes - 1));

        assigned[i] = scene;
        sequence[i] = next_seq;
        next_seq += 1;
        counts[scene] += 1;
    }

    // 4. Вместимость
    for s in 0..n_scenes {
        while counts[s] > capacity[s] {
            let mut movable: Vec<usize> = (0..n_lines).filter(|&i| assigned[i] == s && !pinned[i]).collect();
            movable.sort_by_key(|&i| std::cmp::Reverse(sequence[i]));

            let mut moved = false;
            'lines: for &i in &movable {
                let order = neighbours(s, n_scenes);
                let onscreen = order.iter().copied().find(|&t| counts[t] < capacity[t] && compatible(i, t));
                let target = match onscreen {
                    Some(t) => Some((t, false)),
                    None if config.allow_offscreen_relocation => order
                        .iter()
                        .copied()
                        .find(|&t| counts[t] < capacity[t])
                        .map(|t| (t, true)),
                    None => None,
                };

                if let Some((t, offscreen)) = target {
                    info!(
                        "Scene {} over capacity ({}/{}): moving line '{}' of {} to scene {}{}",
                        scenes[s].id,
                        counts[s],
                        capacity[s],
                        lines[i].text,
                        lines[i].speaker,
                        scenes[t].id,
                        if offscreen { " (speaker off screen)" } else { "" }
                    );
                    counts[s] -= 1;
                    counts[t] += 1;
                    assigned[i] = t;
                    sequence[i] = next_seq;
                    next_seq += 1;
                    report.relocated.push(Relocation {
                        speaker: lines[i].speaker.clone(),
                        text: lines[i].text.clone(),
                        from_scene: scenes[s].id,
                        to_scene: scenes[t].id,
                        offscreen,
                    });
                    moved = true;
                    break 'lines;
                }
            }

            if !moved {
                warn!(
                    "Scene {} keeps {} lines over capacity {}: no scene has room, leaving them in place",
                    scenes[s].id, counts[s], capacity[s]
                );
                report.overflow.push(Overflow {
                    scene_id: scenes[s].id,
                    lines: counts[s],
                    capacity: capacity[s],
                });
                break;
            }
        }
    }

    // 5. Упаковка
    for s in 0..n_scenes {
        let mut members: Vec<usize> = (0..n_lines).filter(|&i| assigned[i] == s).collect();
        if members.is_empty() {
            continue;
        }
        if members.iter().all(|&i| hints[i].is_some()) {
            members.sort_by_key(|&i| (hints[i].map(|h| h.start).unwrap_or(Millis::ZERO), i));
        }

        let estimates: Vec<Millis> = members.iter().map(|&i| estimate_speech(lines[i].word_count(), config)).collect();
        let ranges = pack_scene(windows[s], &estimates, config);
        for (&i, range) in members.iter().zip(ranges) {
            lines[i].scene_id = Some(scenes[s].id);
            lines[i].time_range = Some(range);
        }
    }

    // 6. Хронологический порядок
    let mut keyed: Vec<(Millis, usize, DialogueLine)> = lines
        .drain(..)
        .enumerate()
        .map(|(i, line)| {
            let start = line.time_range.map(|r| r.start).unwrap_or(Millis::ZERO);
            (start, assigned[i], line)
        })
        .collect();
    keyed.sort_by_key(|(start, scene, _)| (*start, *scene));
    lines.extend(keyed.into_iter().map(|(_, _, line)| line));

    info!(
        "Aligned {} lines into {} scenes ({} relocated, {} scenes over capacity)",
        n_lines,
        n_scenes,
        report.relocated.len(),
        report.overflow.len()
    );
    report
}
