//! Измерение длительности аудио
//!
//! Сначала длительность читается нативно через symphonia (число кадров / частота
//! дискретизации), при неудаче вызывается ffprobe.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{AssemblyError, Result};
use crate::timeline::time::Millis;
use crate::utils::ffmpeg::{args, MediaEngine};

/// Источник длительностей медиафайлов
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<Millis>;
}

/// Прочитать длительность из заголовков контейнера без декодирования
pub fn probe_native(path: &Path) -> Result<Millis> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AssemblyError::AudioProbe(format!("{}: {}", path.display(), e)))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| AssemblyError::AudioProbe(format!("{}: no audio track", path.display())))?;

    match (track.codec_params.n_frames, track.codec_params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => Ok(Millis::from_secs_f64(frames as f64 / rate as f64)),
        _ => Err(AssemblyError::AudioProbe(format!(
            "{}: container does not report frame count",
            path.display()
        ))),
    }
}

/// Разобрать вывод `ffprobe -show_entries format=duration`
pub fn parse_ffprobe_duration(output: &str) -> Result<Millis> {
    let value = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.trim_start_matches("duration="))
        .ok_or_else(|| AssemblyError::AudioProbe("empty ffprobe output".to_string()))?;
    let secs: f64 = value
        .parse()
        .map_err(|_| AssemblyError::AudioProbe(format!("unexpected ffprobe duration '{}'", value)))?;
    Ok(Millis::from_secs_f64(secs))
}

/// Зонд длительности: symphonia, затем ffprobe
#[derive(Clone)]
pub struct MediaProbe {
    engine: Arc<dyn MediaEngine>,
}

impl MediaProbe {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    /// Длительность контейнера по ffprobe (работает и для видео)
    pub async fn ffprobe_duration(&self, path: &Path) -> Result<Millis> {
        let output = self
            .engine
            .probe(&args([
                "-v".to_string(),
                "error".to_string(),
                "-show_entries".to_string(),
                "format=duration".to_string(),
                "-of".to_string(),
                "default=noprint_wrappers=1:nokey=1".to_string(),
                path.display().to_string(),
            ]))
            .await?;
        parse_ffprobe_duration(&output)
    }
}

#[async_trait]
impl DurationProbe for MediaProbe {
    async fn duration(&self, path: &Path) -> Result<Millis> {
        let owned: PathBuf = path.to_path_buf();
        let native = tokio::task::spawn_blocking(move || probe_native(&owned))
            .await
            .map_err(|e| AssemblyError::AudioProbe(format!("probe task failed: {}", e)))?;

        match native {
            Ok(duration) => {
                debug!("Native probe {}: {}", path.display(), duration);
                Ok(duration)
            }
            Err(e) => {
                warn!("Native probe failed ({}), falling back to ffprobe", e);
                self.ffprobe_duration(path).await
            }
        }
    }
}
