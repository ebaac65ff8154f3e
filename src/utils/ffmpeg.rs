//! Модуль для работы с FFmpeg
//!
//! Движок видит ffmpeg/ffprobe только через трейт `MediaEngine`: так графы
//! фильтров можно проверять в тестах без запуска внешних процессов.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::{debug, error};
use tokio::process::Command;

use crate::error::{AssemblyError, Result};

/// Сколько последних строк stderr сохранять в тексте ошибки
const STDERR_TAIL_LINES: usize = 12;

/// Внешний медиадвижок
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Запустить ffmpeg с аргументами
    async fn run(&self, args: &[String]) -> Result<()>;

    /// Запустить ffprobe и вернуть stdout
    async fn probe(&self, args: &[String]) -> Result<String>;
}

/// Медиадвижок на основе бинарников ffmpeg и ffprobe
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self { ffmpeg: PathBuf::from("ffmpeg"), ffprobe: PathBuf::from("ffprobe") }
    }

    /// Использовать бинарники из указанных путей
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into(), ffprobe: ffprobe.into() }
    }

    /// Проверка наличия FFmpeg
    pub async fn check_installed(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn execute(&self, binary: &PathBuf, args: &[String]) -> anyhow::Result<String> {
        debug!("{} {}", binary.display(), args.join(" "));
        let output = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr_tail(&stderr);
            error!("{} failed with {}: {}", binary.display(), output.status, tail);
            return Err(anyhow!("{} exited with {}: {}", binary.display(), output.status, tail));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn run(&self, args: &[String]) -> Result<()> {
        let mut full = vec!["-y".to_string(), "-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()];
        full.extend_from_slice(args);
        self.execute(&self.ffmpeg, &full)
            .await
            .map(|_| ())
            .map_err(|e| AssemblyError::MediaEngine(format!("{:#}", e)))
    }

    async fn probe(&self, args: &[String]) -> Result<String> {
        self.execute(&self.ffprobe, args)
            .await
            .map_err(|e| AssemblyError::MediaEngine(format!("{:#}", e)))
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let from = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[from..].join(" | ")
}

/// Собрать вектор аргументов из строковых срезов
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr: String = (0..20).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&stderr);
        assert!(tail.starts_with("line 8"));
        assert!(tail.ends_with("line 19"));
    }

    #[tokio::test]
    async fn missing_binary_is_media_engine_error() {
        let engine = FfmpegEngine::with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(!engine.check_installed().await);
        let err = engine.probe(&args(["-version"])).await.unwrap_err();
        assert!(matches!(err, AssemblyError::MediaEngine(_)));
    }
}
