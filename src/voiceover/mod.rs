//! # Voiceover
//!
//! Подгонка синтезированных реплик под выделенные им слоты.

pub mod fit;
pub mod shorten;

pub use fit::{needs_refit, FitOutcome, FitRegulator};
pub use shorten::shorten_locally;
