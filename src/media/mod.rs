//! # Media
//!
//! Сборка медиафайлов через внешний медиадвижок: сведение звука, граф
//! видеодорожки, финальное кодирование и измерение длительностей.

pub mod audio;
pub mod encode;
pub mod probe;
pub mod video;

pub use audio::{build_mix_graph, AudioMixer, MixGraph};
pub use encode::AdaptiveEncoder;
pub use probe::{DurationProbe, MediaProbe};
pub use video::{build_video_graph, VideoGraph};
