//! Финальное кодирование с лестницей качества
//!
//! Ступени перебираются от лучшего качества к самой надежной; ошибка ступени
//! только логируется. После записи файл проверяется через ffprobe, а при
//! отсутствии видеопотока перепаковывается без перекодирования.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::config::{EncodeConfig, EncodePreset};
use crate::error::{AssemblyError, Result};
use crate::media::video::VideoGraph;
use crate::timeline::time::Millis;
use crate::utils::ffmpeg::MediaEngine;

/// Кодировщик с лестницей качества
pub struct AdaptiveEncoder {
    engine: Arc<dyn MediaEngine>,
    config: EncodeConfig,
}

impl AdaptiveEncoder {
    pub fn new(engine: Arc<dyn MediaEngine>, config: EncodeConfig) -> Self {
        Self { engine, config }
    }

    /// Аргументы ffmpeg для одной ступени
    pub fn encode_args(&self, graph: &VideoGraph, audio: &Path, total: Millis, preset: &EncodePreset, out: &Path) -> Vec<String> {
        let mut args = graph.input_args.clone();
        args.extend(["-i".to_string(), audio.display().to_string()]);
        args.extend([
            "-filter_complex".to_string(),
            graph.filter_complex(),
            "-map".to_string(),
            format!("[{}]", graph.output_label),
            "-map".to_string(),
            format!("{}:a", graph.inputs),
            "-c:v".to_string(),
            preset.video_codec.clone(),
            "-preset".to_string(),
            preset.speed.clone(),
            "-crf".to_string(),
            preset.crf.to_string(),
        ]);
        if let Some(threads) = preset.threads {
            args.extend(["-threads".to_string(), threads.to_string()]);
        }
        args.extend([
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            self.config.fps.to_string(),
            "-c:a".to_string(),
            self.config.audio_codec.clone(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-t".to_string(),
            total.ffmpeg_secs(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            out.display().to_string(),
        ]);
        args
    }

    /// Закодировать ролик, перебирая ступени лестницы
    pub async fn encode(&self, graph: &VideoGraph, audio: &Path, total: Millis, out: &Path) -> Result<PathBuf> {
        let mut failures = Vec::new();

        for preset in &self.config.ladder {
            info!("Encoding with preset '{}' ({} crf {})", preset.name, preset.speed, preset.crf);
            let args = self.encode_args(graph, audio, total, preset, out);
            if let Err(e) = self.engine.run(&args).await {
                warn!("Preset '{}' failed: {}", preset.name, e);
                failures.push(format!("{}: {}", preset.name, e));
                continue;
            }

            match self.ensure_video_stream(out).await {
                Ok(()) => {
                    info!("Encoded {} with preset '{}'", out.display(), preset.name);
                    return Ok(out.to_path_buf());
                }
                Err(e) => {
                    warn!("Output of preset '{}' is unusable: {}", preset.name, e);
                    failures.push(format!("{}: {}", preset.name, e));
                }
            }
        }

        Err(AssemblyError::EncodingFailure(format!(
            "all {} presets failed: {}",
            self.config.ladder.len(),
            failures.join("; ")
        )))
    }

    /// Есть ли в файле видеопоток
    pub async fn has_video_stream(&self, path: &Path) -> Result<bool> {
        let output = self
            .engine
            .probe(&[
                "-v".to_string(),
                "error".to_string(),
                "-show_entries".to_string(),
                "stream=codec_type".to_string(),
                "-of".to_string(),
                "csv=p=0".to_string(),
                path.display().to_string(),
            ])
            .await?;
        Ok(output.lines().any(|l| l.trim() == "video"))
    }

    /// Проверить файл, при необходимости перепаковать и проверить снова
    async fn ensure_video_stream(&self, out: &Path) -> Result<()> {
        if self.has_video_stream(out).await? {
            return Ok(());
        }

        warn!("No video stream in {}, remuxing", out.display());
        let remuxed = out.with_extension("remux.mp4");
        self.engine
            .run(&[
                "-i".to_string(),
                out.display().to_string(),
                "-map".to_string(),
                "0".to_string(),
                "-c".to_string(),
                "copy".to_string(),
                remuxed.display().to_string(),
            ])
            .await?;

        if !self.has_video_stream(&remuxed).await? {
            return Err(AssemblyError::EncodingFailure(format!(
                "{} has no video stream after remux",
                out.display()
            )));
        }
        tokio::fs::rename(&remuxed, out).await?;
        Ok(())
    }
}
