//! Вспомогательные модули: запуск ffmpeg и временные файлы

pub mod ffmpeg;
pub mod temp;

#[cfg(test)]
pub(crate) mod testing;

pub use ffmpeg::{FfmpegEngine, MediaEngine};
pub use temp::TempFileManager;
