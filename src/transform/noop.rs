//! Composite transformation that does nothing itself

use super::{ApplyContext, Operation};
use crate::error::BeaverResult;
use async_trait::async_trait;

/// Succeeds immediately; used for groups and aggregate targets
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

#[async_trait]
impl Operation for Noop {
    async fn apply(&self, _ctx: &ApplyContext) -> BeaverResult<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "noop"
    }
}
