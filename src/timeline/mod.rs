//! # Timeline
//!
//! Модель таймлайна ролика и алгоритмы, которые решают, когда звучит каждая
//! реплика и когда начинается каждый клип.

pub mod time;
pub mod model;
pub mod speaker;
pub mod reconcile;
pub mod align;
pub mod compositor;

pub use time::{Millis, TimeRange};
pub use model::{
    BeatGrid, CapacityTable, DialogueLine, Scene, TransitionType, VoiceIdentity, NARRATOR,
};
pub use reconcile::{reconcile_durations, ReconcileReport};
pub use align::{align_dialogue, estimate_speech, AlignReport};
pub use compositor::{compose, remap_lines, Composition};

#[cfg(test)]
mod tests {
    mod test_align;
}
