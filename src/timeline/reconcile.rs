//! Подгонка длительностей сцен под целевую длительность ролика
//!
//! Генератор клипов выдает только дискретные длительности (например, 4/6/8 секунд),
//! поэтому сумма плановых длительностей почти никогда не совпадает с целевой.
//! Подгонка поднимает или опускает отдельные сцены на соседнюю ступень в
//! детерминированном псевдослучайном порядке, пока сумма не попадет в допуск.

use log::{debug, info, warn};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::ReconcileConfig;
use crate::timeline::model::{total_duration, Scene};
use crate::timeline::time::Millis;

/// Итог подгонки
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Сумма длительностей после подгонки
    pub total: Millis,
    /// Требуемая сумма с учетом перекрытий переходов
    pub desired: Millis,
    /// Сколько проходов было сделано
    pub passes: usize,
    /// Попала ли сумма в допуск
    pub converged: bool,
}

/// Сид порядка обхода: MD5 от строки, свернутый в u64
pub fn seed_from(text: &str) -> u64 {
    let digest = md5::compute(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);
    u64::from_le_bytes(bytes)
}

/// Детерминированный порядок обхода сцен для данного сида
///
/// Перестановка Фишера-Йетса поверх потока ChaCha8: порядок зависит только от
/// сида и не меняется при обновлении `rand`.
pub fn visit_order(n: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for i in (1..n).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}

/// Ближайшая допустимая длительность
pub fn snap_to_tier(duration: Millis, tiers: &[Millis]) -> Millis {
    tiers
        .iter()
        .copied()
        .min_by_key(|t| (t.abs_diff(duration), *t))
        .unwrap_or(duration)
}

fn next_tier_up(duration: Millis, tiers: &[Millis]) -> Option<Millis> {
    tiers.iter().copied().find(|t| *t > duration)
}

fn next_tier_down(duration: Millis, tiers: &[Millis]) -> Option<Millis> {
    tiers.iter().rev().copied().find(|t| *t < duration)
}

/// Подогнать длительности сцен под `target`
///
/// `overlap` - перекрытие на каждом переходе (0 для жестких склеек): при
/// crossfade каждый стык съедает `overlap`, поэтому сумма клипов должна быть
/// больше целевой длительности на `overlap × (n − 1)`.
pub fn reconcile_durations(
    scenes: &mut [Scene],
    target: Millis,
    overlap: Millis,
    seed: u64,
    config: &ReconcileConfig,
) -> ReconcileReport {
    let tiers = &config.duration_tiers;
    let tol = config.tolerance;
    let n = scenes.len();

    if n == 0 {
        return ReconcileReport { total: Millis::ZERO, desired: target, passes: 0, converged: false };
    }

    for scene in scenes.iter_mut() {
        let snapped = snap_to_tier(scene.duration, tiers);
        if snapped != scene.duration {
            debug!("Scene {} duration {} snapped to tier {}", scene.id, scene.duration, snapped);
            scene.duration = snapped;
        }
    }

    let desired = target + overlap * (n as i64 - 1);
    let order = visit_order(n, seed);
    let mut sum = total_duration(scenes);
    let mut passes = 0;

    // Растягиваем, пока не хватает
    while sum < desired - tol && passes < config.max_passes {
        passes += 1;
        let mut bumped = false;
        for &idx in &order {
            if sum >= desired - tol {
                break;
            }
            let current = scenes[idx].duration;
            if let Some(up) = next_tier_up(current, tiers) {
                if sum - current + up <= desired + tol {
                    sum = sum - current + up;
                    scenes[idx].duration = up;
                    bumped = true;
                }
            }
        }
        if !bumped {
            break;
        }
    }

    // Укорачиваем, если перебрали
    while sum > desired + tol && passes < config.max_passes {
        passes += 1;
        let mut dropped = false;
        for &idx in &order {
            if sum <= desired + tol {
                break;
            }
            let current = scenes[idx].duration;
            if let Some(down) = next_tier_down(current, tiers) {
                if sum - current + down >= desired - tol {
                    sum = sum - current + down;
                    scenes[idx].duration = down;
                    dropped = true;
                }
            }
        }
        if !dropped {
            break;
        }
    }

    let converged = sum.abs_diff(desired) <= tol;
    if converged {
        info!("Scene durations reconciled: total {} (desired {}) after {} passes", sum, desired, passes);
    } else {
        warn!(
            "Scene durations could not reach desired total: total {} vs desired {} (tolerance {}, passes {})",
            sum, desired, tol, passes
        );
    }

    ReconcileReport { total: sum, desired, passes, converged }
}
