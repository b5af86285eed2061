//! In-process transformations backed by async closures

use super::{ApplyContext, Operation};
use crate::error::BeaverResult;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type ApplyFn = dyn Fn(ApplyContext) -> BoxFuture<'static, BeaverResult<()>> + Send + Sync;

/// Runs a host-supplied async function
///
/// The function receives an owned [`ApplyContext`] and may read inputs and
/// write file or virtual outputs through it.
#[derive(Clone)]
pub struct Function {
    name: String,
    func: Arc<ApplyFn>,
}

impl Function {
    /// Wrap an async closure
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ApplyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BeaverResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx| Box::pin(func(ctx))),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Operation for Function {
    async fn apply(&self, ctx: &ApplyContext) -> BeaverResult<()> {
        (self.func)(ctx.clone()).await
    }

    fn kind(&self) -> &'static str {
        "function"
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
