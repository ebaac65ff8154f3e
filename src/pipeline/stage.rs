//! Этапы проекта и допустимые переходы между ними

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AssemblyError, Result};

/// Состояние проекта
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Planned,
    GeneratingImages,
    ImagesComplete,
    GeneratingVideos,
    VideosComplete,
    Assembling,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Planned => "planned",
            Self::GeneratingImages => "generating_images",
            Self::ImagesComplete => "images_complete",
            Self::GeneratingVideos => "generating_videos",
            Self::VideosComplete => "videos_complete",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Следующий этап при успешном выполнении
    pub fn next(&self) -> Option<ProjectStatus> {
        match self {
            Self::Planning => Some(Self::Planned),
            Self::Planned => Some(Self::GeneratingImages),
            Self::GeneratingImages => Some(Self::ImagesComplete),
            Self::ImagesComplete => Some(Self::GeneratingVideos),
            Self::GeneratingVideos => Some(Self::VideosComplete),
            Self::VideosComplete => Some(Self::Assembling),
            Self::Assembling => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Переход разрешен только на следующий этап или в `failed`
    pub fn can_transition_to(&self, to: ProjectStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }

    /// Проверить переход
    pub fn transition(&self, to: ProjectStatus) -> Result<ProjectStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(AssemblyError::InvalidTransition { from: self.to_string(), to: to.to_string() })
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
