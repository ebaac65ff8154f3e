//! Видеодорожка: граф фильтров из клипов сцен
//!
//! Каждая сцена представлена своим клипом, а если клип не сгенерировался -
//! статичным изображением или черным кадром. Все входы приводятся к одному
//! размеру и частоте кадров и обрезаются по длительности сцены.

use log::{info, warn};

use crate::config::EncodeConfig;
use crate::error::{AssemblyError, Result};
use crate::timeline::compositor::Composition;
use crate::timeline::model::{Scene, TransitionType};

/// Граф фильтров видеодорожки
#[derive(Debug, Clone, PartialEq)]
pub struct VideoGraph {
    pub input_args: Vec<String>,
    /// Количество входов (индекс следующего входа)
    pub inputs: usize,
    pub filters: Vec<String>,
    pub output_label: String,
}

impl VideoGraph {
    pub fn filter_complex(&self) -> String {
        self.filters.join(";")
    }
}

/// Источник кадров сцены
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneSource {
    Clip,
    Still,
    Black,
}

pub fn scene_source(scene: &Scene) -> SceneSource {
    if scene.clip_path.is_some() {
        SceneSource::Clip
    } else if scene.image_path.is_some() {
        SceneSource::Still
    } else {
        SceneSource::Black
    }
}

/// Построить граф видеодорожки
///
/// Ни одного клипа - нарушение целостности: собирать ролик из одних
/// картинок и заглушек бессмысленно.
pub fn build_video_graph(
    scenes: &[Scene],
    composition: &Composition,
    transition: TransitionType,
    config: &EncodeConfig,
) -> Result<VideoGraph> {
    let clips = scenes.iter().filter(|s| scene_source(s) == SceneSource::Clip).count();
    if clips == 0 {
        return Err(AssemblyError::FatalIntegrity(format!(
            "none of {} scenes has a usable clip",
            scenes.len()
        )));
    }
    if clips < scenes.len() {
        warn!("{} of {} scenes fall back to stills or black frames", scenes.len() - clips, scenes.len());
    }

    let (w, h, fps) = (config.width, config.height, config.fps);
    let mut input_args = Vec::new();
    let mut filters = Vec::new();

    for (i, scene) in scenes.iter().enumerate() {
        let duration = scene.duration.ffmpeg_secs();
        match scene_source(scene) {
            SceneSource::Clip => {
                if let Some(path) = &scene.clip_path {
                    input_args.extend(["-i".to_string(), path.display().to_string()]);
                }
            }
            SceneSource::Still => {
                if let Some(path) = &scene.image_path {
                    input_args.extend([
                        "-loop".to_string(),
                        "1".to_string(),
                        "-t".to_string(),
                        duration.clone(),
                        "-i".to_string(),
                        path.display().to_string(),
                    ]);
                }
            }
            SceneSource::Black => {
                input_args.extend([
                    "-f".to_string(),
                    "lavfi".to_string(),
                    "-t".to_string(),
                    duration.clone(),
                    "-i".to_string(),
                    format!("color=c=black:s={}x{}:r={}", w, h, fps),
                ]);
            }
        }
        // Короткий клип продлевается последним кадром
        filters.push(format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p,tpad=stop_mode=clone:stop_duration={d},trim=0:{d},setpts=PTS-STARTPTS[v{i}]",
            i = i,
            w = w,
            h = h,
            fps = fps,
            d = duration
        ));
    }

    let last = scenes.len() - 1;
    if scenes.len() == 1 {
        filters.push("[v0]null[vout]".to_string());
    } else if !transition.is_crossfade() {
        let inputs: String = (0..scenes.len()).map(|i| format!("[v{}]", i)).collect();
        filters.push(format!("{}concat=n={}:v=1:a=0[vout]", inputs, scenes.len()));
    } else {
        let name = transition.xfade_name().unwrap_or("fade");
        let mut current = "v0".to_string();
        for i in 1..scenes.len() {
            let output = if i == last { "vout".to_string() } else { format!("x{}", i) };
            let overlap = composition.overlap_before(i);
            if overlap.as_ms() > 0 {
                filters.push(format!(
                    "[{}][v{}]xfade=transition={}:duration={}:offset={}[{}]",
                    current,
                    i,
                    name,
                    overlap.ffmpeg_secs(),
                    composition.starts[i].ffmpeg_secs(),
                    output
                ));
            } else {
                filters.push(format!("[{}][v{}]concat=n=2:v=1:a=0[{}]", current, i, output));
            }
            current = output;
        }
    }

    info!(
        "Video graph: {} scenes, {} clips, transition {:?}, total {}",
        scenes.len(),
        clips,
        transition,
        composition.total
    );
    Ok(VideoGraph { input_args, inputs: scenes.len(), filters, output_label: "vout".to_string() })
}
