//! Scheduler: walks a plan, skips fresh work, runs stale work in parallel
//!
//! Per-transformation state machine:
//! `pending -> evaluating -> {fresh | running -> {succeeded | failed}} | cancelled`
//!
//! The coordinator starts eligible transformations in plan order while
//! permits of a bounded semaphore are available. A transformation is
//! eligible once every producer of its inputs has finished successfully.
//! A failure cancels all transitive dependents; independent branches keep
//! running unless `fail_fast` is set.

pub mod events;
pub mod report;

pub use events::BuildEvent;
pub use report::{BuildResult, Outcome, TransformStatus};

use crate::artifact::{Artifact, ArtifactId};
use crate::error::{BeaverError, BeaverResult};
use crate::graph::{BuildGraph, Plan};
use crate::store::{evaluate, Observation, StalenessRecord, StalenessStore};
use crate::transform::{ApplyContext, Transformation};
use futures_util::FutureExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tunables for one build invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Maximum number of transformations evaluated at once (at least 1)
    pub concurrency: usize,
    /// Report stale transformations without running them
    pub dry_run: bool,
    /// Cancel all pending work on the first failure
    pub fail_fast: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            dry_run: false,
            fail_fast: false,
        }
    }
}

impl BuildOptions {
    /// Set the concurrency limit, clamped to at least 1
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// Number of CPUs available to the process
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Runs builds over a graph, persisting staleness records to a store
pub struct Scheduler<'g> {
    graph: &'g BuildGraph,
    store: Arc<StalenessStore>,
    options: BuildOptions,
    env: Arc<HashMap<String, String>>,
    events: Option<UnboundedSender<BuildEvent>>,
    cancel: CancellationToken,
}

impl<'g> Scheduler<'g> {
    /// Create a scheduler with default options
    pub fn new(graph: &'g BuildGraph, store: Arc<StalenessStore>) -> Self {
        Self {
            graph,
            store,
            options: BuildOptions::default(),
            env: Arc::new(HashMap::new()),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Environment passed to every operation
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Publish progress events on a channel
    pub fn events(mut self, sender: UnboundedSender<BuildEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Token aborting the whole build when cancelled
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build the requested targets
    ///
    /// Graph errors (unknown target) are returned as `Err` before anything
    /// runs. Execution failures are reported per transformation in the
    /// returned [`BuildResult`].
    #[instrument(name = "build", skip_all, fields(targets = targets.len()))]
    pub async fn build<S: AsRef<str>>(&self, targets: &[S]) -> BeaverResult<BuildResult> {
        let plan = self.graph.resolve(targets)?;
        Ok(self.execute(&plan).await)
    }

    /// Run a previously resolved plan
    pub async fn execute(&self, plan: &Plan) -> BuildResult {
        let started = Instant::now();
        let concurrency = self.options.concurrency.max(1);
        let build_cancel = self.cancel.child_token();

        // Digests memoized by a previous build in this process may be outdated
        for transform in plan.transformations() {
            for artifact in transform.inputs().iter().chain(transform.outputs()) {
                artifact.invalidate();
            }
        }

        let shared = Arc::new(Shared {
            store: self.store.clone(),
            events: self.events.clone(),
            root: self.graph.root().to_path_buf(),
            env: self.env.clone(),
            cancel: build_cancel.clone(),
            interrupt: self.cancel.clone(),
            dry_run: self.options.dry_run,
            sources: plan
                .sources()
                .iter()
                .map(|a| a.identity().clone())
                .collect(),
        });

        shared.emit(BuildEvent::Started {
            targets: plan.targets().to_vec(),
            transformations: plan.len(),
            concurrency,
            dry_run: self.options.dry_run,
        });
        info!(
            transformations = plan.len(),
            concurrency,
            dry_run = self.options.dry_run,
            "build_started"
        );

        let count = plan.len();
        let mut outcomes: Vec<Option<Outcome>> = vec![None; count];
        let mut waiting: Vec<usize> = (0..count).map(|i| plan.dependencies(i).len()).collect();
        let mut upstream_would_run = vec![false; count];
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| waiting[i] == 0).collect();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<(usize, TransformStatus, Option<String>, Duration)> =
            JoinSet::new();

        loop {
            while !build_cancel.is_cancelled() {
                let Some(&next) = ready.first() else { break };
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                ready.remove(&next);

                let transform = plan.transformations()[next].clone();
                shared.emit(BuildEvent::Scheduled {
                    transform: transform.id().clone(),
                });
                debug!(transform = %transform.id(), "scheduled");

                let task = run_transformation(
                    shared.clone(),
                    transform,
                    upstream_would_run[next],
                    permit,
                );
                tasks.spawn(async move {
                    let started = Instant::now();
                    let (status, reason) = AssertUnwindSafe(task)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            (TransformStatus::Failed, Some("operation panicked".to_string()))
                        });
                    (next, status, reason, started.elapsed())
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (index, status, reason, duration) = match joined {
                Ok(result) => result,
                Err(e) => {
                    // Tasks catch panics, so this only happens on runtime shutdown
                    error!("Scheduler task lost: {}", e);
                    break;
                }
            };

            let id = plan.transformations()[index].id().clone();
            outcomes[index] = Some(Outcome {
                transform: id.clone(),
                status,
                reason: reason.clone(),
                duration,
            });

            match status {
                TransformStatus::Succeeded | TransformStatus::Fresh | TransformStatus::WouldRun => {
                    for &dependent in plan.dependents(index) {
                        if status == TransformStatus::WouldRun {
                            upstream_would_run[dependent] = true;
                        }
                        waiting[dependent] -= 1;
                        if waiting[dependent] == 0 && outcomes[dependent].is_none() {
                            ready.insert(dependent);
                        }
                    }
                }
                TransformStatus::Failed | TransformStatus::Cancelled => {
                    let cause = match status {
                        TransformStatus::Failed => format!("dependency [{}] failed", id),
                        _ => format!("dependency [{}] was cancelled", id),
                    };
                    for dependent in plan.descendants(index) {
                        if outcomes[dependent].is_none() {
                            ready.remove(&dependent);
                            outcomes[dependent] = Some(cancelled(&shared, plan, dependent, &cause));
                        }
                    }
                    if status == TransformStatus::Failed && self.options.fail_fast {
                        warn!(transform = %id, "fail-fast: cancelling remaining work");
                        build_cancel.cancel();
                    }
                }
            }
        }

        let cause = shared.abort_reason();
        for (index, slot) in outcomes.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(cancelled(&shared, plan, index, cause));
            }
        }

        let result = BuildResult {
            outcomes: outcomes.into_iter().flatten().collect(),
            duration: started.elapsed(),
        };

        shared.emit(BuildEvent::Finished {
            succeeded: result.count(TransformStatus::Succeeded),
            up_to_date: result.count(TransformStatus::Fresh),
            failed: result.count(TransformStatus::Failed),
            cancelled: result.count(TransformStatus::Cancelled),
            would_run: result.count(TransformStatus::WouldRun),
            duration_ms: millis(result.duration),
        });
        info!(
            succeeded = result.count(TransformStatus::Succeeded),
            up_to_date = result.count(TransformStatus::Fresh),
            failed = result.count(TransformStatus::Failed),
            cancelled = result.count(TransformStatus::Cancelled),
            duration_ms = millis(result.duration),
            "build_finished"
        );
        result
    }
}

/// Build `targets` with the given options
pub async fn build<S: AsRef<str>>(
    graph: &BuildGraph,
    store: Arc<StalenessStore>,
    targets: &[S],
    options: BuildOptions,
) -> BeaverResult<BuildResult> {
    Scheduler::new(graph, store)
        .options(options)
        .build(targets)
        .await
}

/// State shared by the tasks of one build
struct Shared {
    store: Arc<StalenessStore>,
    events: Option<UnboundedSender<BuildEvent>>,
    root: PathBuf,
    env: Arc<HashMap<String, String>>,
    cancel: CancellationToken,
    /// Cancelled only from outside the build
    interrupt: CancellationToken,
    dry_run: bool,
    /// Plan inputs without a producer
    sources: HashSet<ArtifactId>,
}

impl Shared {
    fn emit(&self, event: BuildEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn abort_reason(&self) -> &'static str {
        if self.interrupt.is_cancelled() {
            "build interrupted"
        } else {
            "build aborted after failure"
        }
    }
}

fn cancelled(shared: &Shared, plan: &Plan, index: usize, cause: &str) -> Outcome {
    let transform = plan.transformations()[index].id().clone();
    info!(transform = %transform, reason = cause, "cancelled");
    shared.emit(BuildEvent::Cancelled {
        transform: transform.clone(),
        reason: cause.to_string(),
    });
    Outcome {
        transform,
        status: TransformStatus::Cancelled,
        reason: Some(cause.to_string()),
        duration: Duration::ZERO,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn observe(artifacts: &[Arc<Artifact>]) -> BeaverResult<Vec<Observation>> {
    artifacts
        .iter()
        .map(|a| Ok((a.identity().clone(), a.resolve()?)))
        .collect()
}

/// Evaluate one transformation and run it if stale
///
/// The permit is held for the whole evaluation.
async fn run_transformation(
    shared: Arc<Shared>,
    transform: Arc<Transformation>,
    upstream_would_run: bool,
    _permit: OwnedSemaphorePermit,
) -> (TransformStatus, Option<String>) {
    let id = transform.id().clone();

    if shared.cancel.is_cancelled() {
        return finish_cancelled(&shared, &transform, shared.abort_reason());
    }

    // Digesting reads storage; keep it off the async workers
    let observed = {
        let transform = transform.clone();
        tokio::task::spawn_blocking(move || {
            Ok::<_, BeaverError>((observe(transform.inputs())?, observe(transform.outputs())?))
        })
        .await
        .unwrap_or_else(|e| Err(BeaverError::Internal(format!("digest task failed: {e}"))))
    };
    let (inputs, outputs) = match observed {
        Ok(observed) => observed,
        Err(e) => return finish_failed(&shared, &transform, e.to_string(), Duration::ZERO),
    };

    // Digesting can block for a long time
    if shared.cancel.is_cancelled() {
        return finish_cancelled(&shared, &transform, shared.abort_reason());
    }

    // Missing root inputs cannot be produced by anything
    for ((input_id, digest), input) in inputs.iter().zip(transform.inputs()) {
        if digest.is_none() && !input.absence_is_acceptable() && shared.sources.contains(input_id)
        {
            let err = BeaverError::resource(input_id.as_str(), "required input does not exist");
            return finish_failed(&shared, &transform, err.to_string(), Duration::ZERO);
        }
    }

    if shared.dry_run && upstream_would_run {
        return finish_would_run(&shared, &transform, "an upstream transformation would run");
    }

    let record = shared.store.query(&id);
    let Some(reason) = evaluate(record.as_ref(), &inputs, &outputs) else {
        info!(transform = %id, "up_to_date");
        shared.emit(BuildEvent::UpToDate {
            transform: id.clone(),
        });
        return (TransformStatus::Fresh, None);
    };

    let reason = reason.to_string();
    info!(transform = %id, reason = %reason, "stale");
    shared.emit(BuildEvent::Stale {
        transform: id.clone(),
        reason: reason.clone(),
    });

    if shared.dry_run {
        return finish_would_run(&shared, &transform, &reason);
    }

    if shared.cancel.is_cancelled() {
        return finish_cancelled(&shared, &transform, shared.abort_reason());
    }

    let description = transform.operation().describe();
    info!(transform = %id, kind = transform.operation().kind(), description = %description, "executing");
    shared.emit(BuildEvent::Executing {
        transform: id.clone(),
        description,
    });

    let ctx = ApplyContext {
        transform: id.clone(),
        inputs: transform.inputs().to_vec(),
        outputs: transform.outputs().to_vec(),
        root: shared.root.clone(),
        env: shared.env.clone(),
        cancel: shared.cancel.clone(),
    };
    let started = Instant::now();
    let result = transform.execute(&ctx).await;
    let duration = started.elapsed();

    match result {
        Ok(()) => {}
        Err(BeaverError::Cancelled) => {
            return finish_cancelled(&shared, &transform, "interrupted while running");
        }
        Err(e) => return finish_failed(&shared, &transform, e.to_string(), duration),
    }

    let outputs = match observe(transform.outputs()) {
        Ok(outputs) => outputs,
        Err(e) => return finish_failed(&shared, &transform, e.to_string(), duration),
    };
    let record = StalenessRecord::new(&inputs, &outputs, millis(duration));
    if let Err(e) = shared.store.commit(id.clone(), record).await {
        warn!(transform = %id, "{}", e);
    }

    info!(transform = %id, duration_ms = millis(duration), "succeeded");
    shared.emit(BuildEvent::Succeeded {
        transform: id,
        duration_ms: millis(duration),
    });
    (TransformStatus::Succeeded, None)
}

fn finish_failed(
    shared: &Shared,
    transform: &Transformation,
    reason: String,
    duration: Duration,
) -> (TransformStatus, Option<String>) {
    error!(transform = %transform.id(), reason = %reason, "failed");
    shared.emit(BuildEvent::Failed {
        transform: transform.id().clone(),
        reason: reason.clone(),
        duration_ms: millis(duration),
    });
    (TransformStatus::Failed, Some(reason))
}

fn finish_cancelled(
    shared: &Shared,
    transform: &Transformation,
    reason: &str,
) -> (TransformStatus, Option<String>) {
    info!(transform = %transform.id(), reason, "cancelled");
    shared.emit(BuildEvent::Cancelled {
        transform: transform.id().clone(),
        reason: reason.to_string(),
    });
    (TransformStatus::Cancelled, Some(reason.to_string()))
}

fn finish_would_run(
    shared: &Shared,
    transform: &Transformation,
    reason: &str,
) -> (TransformStatus, Option<String>) {
    info!(transform = %transform.id(), reason, "would_run");
    shared.emit(BuildEvent::WouldRun {
        transform: transform.id().clone(),
        reason: reason.to_string(),
    });
    (TransformStatus::WouldRun, Some(reason.to_string()))
}
