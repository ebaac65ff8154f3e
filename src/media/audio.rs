//! Сведение звуковой дорожки ролика
//!
//! Три слоя: реплики (каждая в своем слоте на фактическом таймлайне), звуковые
//! эффекты сцен и музыкальная подложка с приглушением под голос. Результат
//! дополняется тишиной и обрезается ровно до длительности видео.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, info, warn};

use crate::config::MixConfig;
use crate::error::{AssemblyError, Result};
use crate::media::probe::DurationProbe;
use crate::timeline::model::{planned_windows, DialogueLine, Scene};
use crate::timeline::time::Millis;
use crate::utils::ffmpeg::MediaEngine;

/// Граф фильтров ffmpeg для микса
#[derive(Debug, Clone, PartialEq)]
pub struct MixGraph {
    /// Аргументы входов (`-i ...`, `-stream_loop -1 -i ...`)
    pub input_args: Vec<String>,
    /// Цепочки фильтров
    pub filters: Vec<String>,
    /// Метка выхода
    pub output_label: String,
}

impl MixGraph {
    pub fn filter_complex(&self) -> String {
        self.filters.join(";")
    }

    /// Полный список аргументов ffmpeg
    pub fn to_args(&self, sample_rate: u32, out: &Path) -> Vec<String> {
        let mut args = self.input_args.clone();
        args.extend([
            "-filter_complex".to_string(),
            self.filter_complex(),
            "-map".to_string(),
            format!("[{}]", self.output_label),
            "-ar".to_string(),
            sample_rate.to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            out.display().to_string(),
        ]);
        args
    }
}

#[derive(Default)]
struct GraphBuilder {
    input_args: Vec<String>,
    inputs: usize,
    filters: Vec<String>,
}

impl GraphBuilder {
    fn add_input(&mut self, path: &Path, looped: bool) -> usize {
        if looped {
            self.input_args.extend(["-stream_loop".to_string(), "-1".to_string()]);
        }
        self.input_args.extend(["-i".to_string(), path.display().to_string()]);
        self.inputs += 1;
        self.inputs - 1
    }

    /// Смешать метки в одну; одна метка возвращается как есть
    fn mix(&mut self, labels: &[String], output: &str) -> Option<String> {
        match labels {
            [] => None,
            [label] => Some(label.clone()),
            _ => {
                let inputs: String = labels.iter().map(|l| format!("[{}]", l)).collect();
                self.filters.push(format!(
                    "{}amix=inputs={}:normalize=0:dropout_transition=0[{}]",
                    inputs,
                    labels.len(),
                    output
                ));
                Some(output.to_string())
            }
        }
    }
}

fn fades(length: Millis, fade: Millis) -> String {
    if fade <= Millis::ZERO || length <= fade * 2 {
        return String::new();
    }
    format!(
        ",afade=t=in:st=0:d={},afade=t=out:st={}:d={}",
        fade.ffmpeg_secs(),
        (length - fade).ffmpeg_secs(),
        fade.ffmpeg_secs()
    )
}

fn delay(start: Millis) -> String {
    let ms = start.clamp_non_negative().as_ms();
    format!("adelay={}|{}", ms, ms)
}

/// Построить граф микса; `None`, если нет ни одного аудиоисточника
///
/// Реплики должны быть уже перенесены на фактический таймлайн, а у сцен
/// заполнено `actual_start`.
pub fn build_mix_graph(
    lines: &[DialogueLine],
    scenes: &[Scene],
    bed: Option<&Path>,
    total: Millis,
    config: &MixConfig,
) -> Option<MixGraph> {
    let mut graph = GraphBuilder::default();
    let format = format!("aresample={},aformat=sample_fmts=fltp:channel_layouts=stereo", config.sample_rate);

    // Реплики
    let mut voice_labels = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let (path, range) = match (&line.audio_path, line.time_range) {
            (Some(path), Some(range)) => (path, range),
            _ => continue,
        };
        let slot = range.duration();
        if slot <= Millis::ZERO {
            continue;
        }
        let input = graph.add_input(path, false);
        let measured = line.measured_duration.unwrap_or(slot);

        let mut chain = format!("[{}:a]{}", input, format);
        if measured > slot + config.stretch_tolerance {
            let factor = (measured.as_secs_f64() / slot.as_secs_f64()).min(config.max_stretch);
            debug!("Line {} sped up x{:.3} to fit {}", i, factor, slot);
            chain.push_str(&format!(",atempo={:.4}", factor));
        }
        chain.push_str(&format!(",atrim=0:{},asetpts=PTS-STARTPTS", slot.ffmpeg_secs()));
        chain.push_str(&fades(slot.min(measured), config.line_fade));
        chain.push_str(&format!(",{},volume={:.3}[vo{}]", delay(range.start), config.dialogue_volume, i));
        graph.filters.push(chain);
        voice_labels.push(format!("vo{}", i));
    }
    let dialogue = graph.mix(&voice_labels, "dialogue");

    // Эффекты сцен
    let windows = planned_windows(scenes);
    let mut sfx_labels = Vec::new();
    for (i, scene) in scenes.iter().enumerate() {
        let Some(path) = &scene.sfx_path else { continue };
        let start = scene.actual_start.unwrap_or(windows[i].start);
        let cap = scene
            .duration
            .scale_floor(config.sfx_max_fraction)
            .min(config.sfx_max);
        if cap <= Millis::ZERO {
            continue;
        }
        let input = graph.add_input(path, false);
        graph.filters.push(format!(
            "[{}:a]{},atrim=0:{},asetpts=PTS-STARTPTS{},{},volume={:.3}[sfx{}]",
            input,
            format,
            cap.ffmpeg_secs(),
            fades(cap, config.sfx_fade),
            delay(start),
            config.sfx_volume,
            i
        ));
        sfx_labels.push(format!("sfx{}", i));
    }
    let effects = graph.mix(&sfx_labels, "effects");

    // Подложка
    let bed_label = bed.map(|path| {
        let input = graph.add_input(path, true);
        let fade_out = if config.bed_fade_out > Millis::ZERO && total > config.bed_fade_out {
            format!(",afade=t=out:st={}:d={}", (total - config.bed_fade_out).ffmpeg_secs(), config.bed_fade_out.ffmpeg_secs())
        } else {
            String::new()
        };
        graph.filters.push(format!(
            "[{}:a]{},atrim=0:{},asetpts=PTS-STARTPTS,volume={:.3}{}[bed]",
            input,
            format,
            total.ffmpeg_secs(),
            config.bed_volume,
            fade_out
        ));
        "bed".to_string()
    });

    let mut layers = Vec::new();
    let dialogue_label = match (dialogue, &bed_label) {
        (Some(dialogue), Some(bed)) if config.ducking => {
            // Детектор дополняется тишиной до конца ролика, иначе компрессор
            // перестает получать сигнал после последней реплики
            graph.filters.push(format!("[{}]asplit=2[dialogue_mix][dialogue_key]", dialogue));
            graph.filters.push(format!("[dialogue_key]apad=whole_dur={}[duck_key]", total.ffmpeg_secs()));
            graph.filters.push(format!(
                "[{}][duck_key]sidechaincompress=threshold={}:ratio={}:attack={}:release={}[bed_ducked]",
                bed, config.duck_threshold, config.duck_ratio, config.duck_attack_ms, config.duck_release_ms
            ));
            layers.push("bed_ducked".to_string());
            Some("dialogue_mix".to_string())
        }
        (dialogue, bed) => {
            if let Some(bed) = bed {
                layers.push(bed.clone());
            }
            dialogue
        }
    };
    if let Some(label) = dialogue_label {
        layers.insert(0, label);
    }
    if let Some(effects) = effects {
        layers.push(effects);
    }

    let premix = graph.mix(&layers, "premix")?;
    graph.filters.push(format!(
        "[{}]loudnorm=I={}:TP={}:LRA={},aresample={},apad=whole_dur={},atrim=0:{},asetpts=PTS-STARTPTS[aout]",
        premix,
        config.loudness_target,
        config.true_peak,
        config.loudness_range,
        config.sample_rate,
        total.ffmpeg_secs(),
        total.ffmpeg_secs()
    ));

    Some(MixGraph { input_args: graph.input_args, filters: graph.filters, output_label: "aout".to_string() })
}

/// Записать стереотишину ровно заданной длительности
pub fn write_silence(path: &Path, total: Millis, sample_rate: u32) -> Result<()> {
    let spec = WavSpec { channels: 2, sample_rate, bits_per_sample: 16, sample_format: SampleFormat::Int };
    let frames = (total.clamp_non_negative().as_ms() * sample_rate as i64) / 1000;

    let mut writer = WavWriter::create(path, spec)?;
    for _ in 0..frames {
        writer.write_sample(0i16)?;
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;

    info!("Wrote {} of silence to {}", total, path.display());
    Ok(())
}

/// Сведение мастер-дорожки
pub struct AudioMixer {
    engine: Arc<dyn MediaEngine>,
    probe: Arc<dyn DurationProbe>,
    config: MixConfig,
}

impl AudioMixer {
    pub fn new(engine: Arc<dyn MediaEngine>, probe: Arc<dyn DurationProbe>, config: MixConfig) -> Self {
        Self { engine, probe, config }
    }

    /// Свести дорожку длительностью `total` в `out` (WAV)
    ///
    /// Проверяет длительность результата: расхождение с видео от
    /// `duration_tolerance` и больше считается нарушением целостности.
    pub async fn mix(
        &self,
        lines: &[DialogueLine],
        scenes: &[Scene],
        bed: Option<&Path>,
        total: Millis,
        out: &Path,
    ) -> Result<PathBuf> {
        match build_mix_graph(lines, scenes, bed, total, &self.config) {
            Some(graph) => {
                info!(
                    "Mixing {} inputs into {} ({})",
                    graph.input_args.iter().filter(|a| a.as_str() == "-i").count(),
                    out.display(),
                    total
                );
                self.engine.run(&graph.to_args(self.config.sample_rate, out)).await?;
            }
            None => {
                warn!("No audio sources, writing silence");
                write_silence(out, total, self.config.sample_rate)?;
            }
        }

        let measured = self.probe.duration(out).await?;
        let drift = measured.abs_diff(total);
        if drift >= self.config.duration_tolerance {
            return Err(AssemblyError::FatalIntegrity(format!(
                "mixed audio is {} but video is {} (drift {})",
                measured, total, drift
            )));
        }
        debug!("Mixed audio {} matches video {}", measured, total);
        Ok(out.to_path_buf())
    }
}
