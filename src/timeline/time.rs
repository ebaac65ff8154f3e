//! Время на таймлайне в целых миллисекундах
//!
//! Все вычисления таймлайна (длительности сцен, смещения переходов, привязка к битам)
//! ведутся в целых миллисекундах, чтобы ошибки округления не накапливались на длинных
//! многосценовых роликах. В сериализованном плане значения хранятся в секундах.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::time::Duration;

/// Момент или длительность на таймлайне, в миллисекундах
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Millis(pub i64);

impl Millis {
    pub const ZERO: Millis = Millis(0);

    /// Создать из целого числа миллисекунд
    pub const fn from_ms(ms: i64) -> Self {
        Self(ms)
    }

    /// Создать из целого числа секунд
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    /// Создать из секунд с плавающей точкой, округляя до ближайшей миллисекунды
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() {
            return Self::ZERO;
        }
        Self((secs * 1000.0).round() as i64)
    }

    /// Значение в миллисекундах
    pub const fn as_ms(self) -> i64 {
        self.0
    }

    /// Значение в секундах
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Строка секунд с тремя знаками для фильтров ffmpeg
    pub fn ffmpeg_secs(self) -> String {
        format!("{:.3}", self.as_secs_f64())
    }

    /// Значение не меньше нуля
    pub fn clamp_non_negative(self) -> Self {
        Self(self.0.max(0))
    }

    /// Вычитание без ухода в отрицательные значения
    pub fn saturating_sub(self, other: Millis) -> Self {
        Self((self.0 - other.0).max(0))
    }

    /// Абсолютное значение разности
    pub fn abs_diff(self, other: Millis) -> Millis {
        Millis((self.0 - other.0).abs())
    }

    /// Масштабирование с округлением вниз (сумма масштабированных значений не превышает исходную)
    pub fn scale_floor(self, factor: f64) -> Self {
        Self((self.0 as f64 * factor).floor() as i64)
    }

    /// Преобразовать в `std::time::Duration` (отрицательные значения дают ноль)
    pub fn to_duration(self) -> Duration {
        Duration::from_millis(self.0.max(0) as u64)
    }
}

impl From<Duration> for Millis {
    fn from(d: Duration) -> Self {
        Self(d.as_millis() as i64)
    }
}

impl Add for Millis {
    type Output = Millis;
    fn add(self, rhs: Millis) -> Millis {
        Millis(self.0 + rhs.0)
    }
}

impl AddAssign for Millis {
    fn add_assign(&mut self, rhs: Millis) {
        self.0 += rhs.0;
    }
}

impl Sub for Millis {
    type Output = Millis;
    fn sub(self, rhs: Millis) -> Millis {
        Millis(self.0 - rhs.0)
    }
}

impl SubAssign for Millis {
    fn sub_assign(&mut self, rhs: Millis) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for Millis {
    type Output = Millis;
    fn mul(self, rhs: i64) -> Millis {
        Millis(self.0 * rhs)
    }
}

impl Sum for Millis {
    fn sum<I: Iterator<Item = Millis>>(iter: I) -> Millis {
        iter.fold(Millis::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Millis> for Millis {
    fn sum<I: Iterator<Item = &'a Millis>>(iter: I) -> Millis {
        iter.fold(Millis::ZERO, |acc, m| acc + *m)
    }
}

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

impl Serialize for Millis {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_secs_f64())
    }
}

impl<'de> Deserialize<'de> for Millis {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Millis::from_secs_f64(secs))
    }
}

/// Полуинтервал `[start, end)` на таймлайне
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Millis,
    pub end: Millis,
}

impl TimeRange {
    pub fn new(start: Millis, end: Millis) -> Self {
        Self { start, end }
    }

    /// Длительность интервала
    pub fn duration(&self) -> Millis {
        self.end.saturating_sub(self.start)
    }

    /// Содержит ли интервал момент `t`
    pub fn contains(&self, t: Millis) -> bool {
        self.start <= t && t < self.end
    }

    /// Лежит ли интервал целиком внутри `outer`
    pub fn within(&self, outer: &TimeRange) -> bool {
        outer.start <= self.start && self.end <= outer.end
    }

    /// Сдвинуть интервал на `delta`
    pub fn shifted(&self, delta: Millis) -> TimeRange {
        TimeRange::new(self.start + delta, self.end + delta)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_to_nearest_millisecond() {
        assert_eq!(Millis::from_secs_f64(3.7), Millis(3700));
        assert_eq!(Millis::from_secs_f64(0.0004), Millis(0));
        assert_eq!(Millis::from_secs_f64(f64::NAN), Millis::ZERO);
        assert_eq!(Millis::from_secs(8).ffmpeg_secs(), "8.000");
    }

    #[test]
    fn repeated_additions_do_not_drift() {
        let step = Millis::from_secs_f64(0.1);
        let total: Millis = std::iter::repeat(step).take(1000).sum();
        assert_eq!(total, Millis::from_secs(100));
    }

    #[test]
    fn serializes_as_seconds() {
        let range = TimeRange::new(Millis(1500), Millis(2250));
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"start":1.5,"end":2.25}"#);
        let back: TimeRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, range);
    }

    #[test]
    fn range_containment() {
        let scene = TimeRange::new(Millis(4000), Millis(8000));
        assert!(TimeRange::new(Millis(4000), Millis(8000)).within(&scene));
        assert!(!TimeRange::new(Millis(3999), Millis(5000)).within(&scene));
        assert!(scene.contains(Millis(4000)));
        assert!(!scene.contains(Millis(8000)));
    }
}
