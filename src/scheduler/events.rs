//! Progress events published while a build runs

use crate::artifact::ArtifactId;
use crate::transform::TransformId;
use serde::Serialize;

/// A state change of the build or one of its transformations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    Started {
        targets: Vec<ArtifactId>,
        transformations: usize,
        concurrency: usize,
        dry_run: bool,
    },
    Scheduled {
        transform: TransformId,
    },
    UpToDate {
        transform: TransformId,
    },
    Stale {
        transform: TransformId,
        reason: String,
    },
    Executing {
        transform: TransformId,
        description: String,
    },
    Succeeded {
        transform: TransformId,
        duration_ms: u64,
    },
    Failed {
        transform: TransformId,
        reason: String,
        duration_ms: u64,
    },
    Cancelled {
        transform: TransformId,
        reason: String,
    },
    WouldRun {
        transform: TransformId,
        reason: String,
    },
    Finished {
        succeeded: usize,
        up_to_date: usize,
        failed: usize,
        cancelled: usize,
        would_run: usize,
        duration_ms: u64,
    },
}

impl BuildEvent {
    /// Transformation the event refers to, if any
    pub fn transform(&self) -> Option<&TransformId> {
        match self {
            Self::Scheduled { transform }
            | Self::UpToDate { transform }
            | Self::Stale { transform, .. }
            | Self::Executing { transform, .. }
            | Self::Succeeded { transform, .. }
            | Self::Failed { transform, .. }
            | Self::Cancelled { transform, .. }
            | Self::WouldRun { transform, .. } => Some(transform),
            Self::Started { .. } | Self::Finished { .. } => None,
        }
    }

    /// Whether the event ends a transformation's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UpToDate { .. }
                | Self::Succeeded { .. }
                | Self::Failed { .. }
                | Self::Cancelled { .. }
                | Self::WouldRun { .. }
        )
    }
}
