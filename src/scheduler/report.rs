//! Final outcome of a build invocation

use crate::transform::TransformId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Terminal status of one transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformStatus {
    /// Ran and succeeded
    Succeeded,
    /// Skipped because nothing changed
    Fresh,
    /// `apply` failed, or an input could not be digested
    Failed,
    /// Never ran: a dependency failed or the build was interrupted
    Cancelled,
    /// Stale during a dry run
    WouldRun,
}

impl TransformStatus {
    /// Whether the status makes the build unsuccessful
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TransformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Fresh => "up to date",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::WouldRun => "would run",
        };
        write!(f, "{}", s)
    }
}

/// What happened to one transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub transform: TransformId,
    pub status: TransformStatus,
    /// Failure cause, cancellation cause or staleness reason
    pub reason: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Result of a build: every transformation of the plan with its status
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildResult {
    /// Outcomes in plan order
    pub outcomes: Vec<Outcome>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl BuildResult {
    fn with_status(&self, status: TransformStatus) -> Vec<&TransformId> {
        self.outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| &o.transform)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&TransformId> {
        self.with_status(TransformStatus::Succeeded)
    }

    /// Transformations skipped as up to date
    pub fn fresh(&self) -> Vec<&TransformId> {
        self.with_status(TransformStatus::Fresh)
    }

    pub fn failed(&self) -> Vec<&TransformId> {
        self.with_status(TransformStatus::Failed)
    }

    pub fn cancelled(&self) -> Vec<&TransformId> {
        self.with_status(TransformStatus::Cancelled)
    }

    pub fn would_run(&self) -> Vec<&TransformId> {
        self.with_status(TransformStatus::WouldRun)
    }

    /// Outcome of a transformation by identity
    pub fn outcome(&self, id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.transform.as_str() == id)
    }

    pub fn status(&self, id: &str) -> Option<TransformStatus> {
        self.outcome(id).map(|o| o.status)
    }

    /// True only if no transformation failed or was cancelled
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|o| o.status.is_failure())
    }

    /// Count of outcomes per status
    pub fn count(&self, status: TransformStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}
