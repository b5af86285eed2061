//! End-to-end scheduling scenarios against a real filesystem

use beaver::error::BeaverError;
use beaver::graph::{BuildGraph, GraphBuilder};
use beaver::scheduler::{self, BuildOptions, Scheduler, TransformStatus};
use beaver::store::StalenessStore;
use beaver::transform::{ApplyContext, Command, Function};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn store(dir: &TempDir) -> Arc<StalenessStore> {
    Arc::new(StalenessStore::empty(dir.path().join(".beaverdigests")))
}

fn write(dir: &TempDir, name: &str, content: &str) {
    std::fs::write(dir.path().join(name), content).unwrap();
}

fn read(dir: &TempDir, name: &str) -> String {
    std::fs::read_to_string(dir.path().join(name)).unwrap()
}

/// a.txt -> b.txt (copy) -> c.txt (uppercase)
fn copy_then_upper(root: &Path) -> BuildGraph {
    let mut builder = GraphBuilder::new(root);
    let a = builder.file("a.txt").unwrap();
    let b = builder.file("b.txt").unwrap();
    let c = builder.file("c.txt").unwrap();
    builder
        .transform(&[b.clone()], &[a], Command::shell("cp $< $@"))
        .unwrap();
    builder
        .transform(&[c], &[b], Command::shell("tr a-z A-Z < $< > $@"))
        .unwrap();
    builder.build().unwrap()
}

/// Function transformation writing `content` to its first output, counting calls
fn counted(name: &str, calls: &Arc<AtomicUsize>, content: &'static str) -> Function {
    let calls = calls.clone();
    Function::new(name, move |ctx: ApplyContext| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            ctx.write_output(0, content).await
        }
    })
}

#[tokio::test]
async fn copy_then_uppercase_rebuilds_only_what_changed() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", "hello");
    let graph = copy_then_upper(dir.path());
    let store = store(&dir);

    let first = scheduler::build(&graph, store.clone(), &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert!(first.is_success(), "{first:?}");
    assert_eq!(first.succeeded().len(), 2);
    assert_eq!(read(&dir, "b.txt"), "hello");
    assert_eq!(read(&dir, "c.txt"), "HELLO");

    // Nothing changed: nothing runs
    let second = scheduler::build(&graph, store.clone(), &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(second.fresh().len(), 2, "{second:?}");

    // Edited root input: whole chain reruns
    write(&dir, "a.txt", "world");
    let third = scheduler::build(&graph, store.clone(), &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(third.succeeded().len(), 2, "{third:?}");
    assert_eq!(read(&dir, "c.txt"), "WORLD");

    // Tampered output: only its producer reruns
    write(&dir, "c.txt", "tampered");
    let fourth = scheduler::build(&graph, store, &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(fourth.status("b.txt"), Some(TransformStatus::Fresh));
    assert_eq!(fourth.status("c.txt"), Some(TransformStatus::Succeeded));
    assert_eq!(read(&dir, "c.txt"), "WORLD");
}

#[tokio::test]
async fn unchanged_intermediate_cuts_off_downstream() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", "hello world");

    let mut builder = GraphBuilder::new(dir.path());
    let a = builder.file("a.txt").unwrap();
    let b = builder.file("b.txt").unwrap();
    let c = builder.file("c.txt").unwrap();
    builder
        .transform(&[b.clone()], &[a], Command::shell("head -c 3 $< > $@"))
        .unwrap();
    builder
        .transform(&[c], &[b], Command::shell("tr a-z A-Z < $< > $@"))
        .unwrap();
    let graph = builder.build().unwrap();
    let store = store(&dir);

    scheduler::build(&graph, store.clone(), &["c.txt"], BuildOptions::default())
        .await
        .unwrap();

    write(&dir, "a.txt", "help me");
    let result = scheduler::build(&graph, store, &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status("b.txt"), Some(TransformStatus::Succeeded));
    assert_eq!(result.status("c.txt"), Some(TransformStatus::Fresh));
    assert_eq!(read(&dir, "c.txt"), "HEL");
}

#[tokio::test]
async fn records_survive_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", "hello");
    let graph = copy_then_upper(dir.path());
    let path = dir.path().join(".beaverdigests");

    let store = Arc::new(StalenessStore::load(&path).await.unwrap());
    scheduler::build(&graph, store, &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert!(path.exists());

    let reopened = Arc::new(StalenessStore::load(&path).await.unwrap());
    assert_eq!(reopened.len(), 2);
    let result = scheduler::build(&graph, reopened, &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(result.fresh().len(), 2);
}

#[tokio::test]
async fn corrupt_store_degrades_to_full_rebuild() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", "hello");
    write(&dir, ".beaverdigests", "{ not json");
    let graph = copy_then_upper(dir.path());

    assert!(matches!(
        StalenessStore::load(dir.path().join(".beaverdigests")).await,
        Err(BeaverError::Persistence { .. })
    ));

    let store = Arc::new(StalenessStore::open(dir.path().join(".beaverdigests")).await);
    let result = scheduler::build(&graph, store, &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(result.succeeded().len(), 2);
}

#[tokio::test]
async fn failure_cancels_dependents_but_not_independent_branches() {
    let dir = TempDir::new().unwrap();
    let mut builder = GraphBuilder::new(dir.path());
    let broken = builder.file("broken.txt").unwrap();
    let after = builder.file("after.txt").unwrap();
    let last = builder.file("last.txt").unwrap();
    let other = builder.file("other.txt").unwrap();
    let all = builder.phony("all").unwrap();
    builder
        .transform(&[broken.clone()], &[], Command::shell("echo boom >&2; exit 3"))
        .unwrap();
    builder
        .transform(&[after.clone()], &[broken], Command::shell("cp $< $@"))
        .unwrap();
    builder
        .transform(&[last.clone()], &[after], Command::shell("cp $< $@"))
        .unwrap();
    builder
        .transform(&[other.clone()], &[], Command::shell("echo ok > $@"))
        .unwrap();
    builder
        .transform(&[all], &[last, other], beaver::transform::Noop)
        .unwrap();
    let graph = builder.build().unwrap();

    let result = scheduler::build(&graph, store(&dir), &["all"], BuildOptions::default())
        .await
        .unwrap();
    assert!(!result.is_success());
    assert_eq!(result.status("broken.txt"), Some(TransformStatus::Failed));
    assert_eq!(result.status("other.txt"), Some(TransformStatus::Succeeded));
    for cancelled in ["after.txt", "last.txt", "all"] {
        assert_eq!(result.status(cancelled), Some(TransformStatus::Cancelled), "{cancelled}");
    }

    let failure = result.outcome("broken.txt").unwrap().reason.clone().unwrap();
    assert!(failure.contains("boom"), "{failure}");
    let cause = result.outcome("after.txt").unwrap().reason.clone().unwrap();
    assert_eq!(cause, "dependency [broken.txt] failed");
    assert!(!dir.path().join("after.txt").exists());
}

#[tokio::test]
async fn failed_transformation_leaves_no_record() {
    let dir = TempDir::new().unwrap();
    let mut builder = GraphBuilder::new(dir.path());
    let out = builder.file("out.txt").unwrap();
    builder
        .transform(&[out], &[], Command::shell("true"))
        .unwrap();
    let graph = builder.build().unwrap();
    let store = store(&dir);

    let result = scheduler::build(&graph, store.clone(), &["out.txt"], BuildOptions::default())
        .await
        .unwrap();
    let reason = result.outcome("out.txt").unwrap().reason.clone().unwrap();
    assert!(reason.contains("did not generate"), "{reason}");
    assert!(store.is_empty());
}

#[tokio::test]
async fn cycle_is_rejected_before_anything_runs() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut builder = GraphBuilder::new(dir.path());
    let x = builder.virtual_artifact("x").unwrap();
    let y = builder.virtual_artifact("y").unwrap();
    builder
        .transform(&[x.clone()], &[y.clone()], counted("make-x", &calls, "x"))
        .unwrap();
    builder
        .transform(&[y], &[x], counted("make-y", &calls, "y"))
        .unwrap();

    match builder.build() {
        Err(BeaverError::Cycle { path }) => {
            assert_eq!(path.first(), path.last());
            assert!(path.len() >= 3, "{path:?}");
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_target_is_a_graph_error() {
    let dir = TempDir::new().unwrap();
    let graph = copy_then_upper(dir.path());
    let err = scheduler::build(&graph, store(&dir), &["nope.txt"], BuildOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BeaverError::UnknownArtifact(name) if name == "nope.txt"));
}

/// Two independent sleepers, tracking how many run at the same time
async fn peak_parallelism(concurrency: usize) -> usize {
    let dir = TempDir::new().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut builder = GraphBuilder::new(dir.path());
    let mut outputs = Vec::new();
    for name in ["left", "right"] {
        let output = builder.virtual_artifact(name).unwrap();
        let (active, peak) = (active.clone(), peak.clone());
        builder
            .transform(
                &[output.clone()],
                &[],
                Function::new(name, move |ctx: ApplyContext| {
                    let (active, peak) = (active.clone(), peak.clone());
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        ctx.write_output(0, "done").await
                    }
                }),
            )
            .unwrap();
        outputs.push(output);
    }
    let graph = builder.build().unwrap();

    let options = BuildOptions::default().with_concurrency(concurrency);
    let result = scheduler::build(&graph, store(&dir), &["left", "right"], options)
        .await
        .unwrap();
    assert_eq!(result.succeeded().len(), 2);
    peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn independent_work_overlaps_up_to_the_limit() {
    assert_eq!(peak_parallelism(2).await, 2);
    assert_eq!(peak_parallelism(1).await, 1);
}

#[tokio::test]
async fn dry_run_reports_without_running() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", "hello");
    let graph = copy_then_upper(dir.path());
    let store = store(&dir);

    let options = BuildOptions::default().with_dry_run(true);
    let result = scheduler::build(&graph, store.clone(), &["c.txt"], options)
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.would_run().len(), 2);
    assert!(!dir.path().join("b.txt").exists());
    assert!(store.is_empty());

    // After a real build the dry run has nothing to report
    scheduler::build(&graph, store.clone(), &["c.txt"], BuildOptions::default())
        .await
        .unwrap();
    let options = BuildOptions::default().with_dry_run(true);
    let result = scheduler::build(&graph, store, &["c.txt"], options)
        .await
        .unwrap();
    assert_eq!(result.fresh().len(), 2);
}

#[tokio::test]
async fn external_cancellation_stops_running_work() {
    let dir = TempDir::new().unwrap();
    let mut builder = GraphBuilder::new(dir.path());
    let slow = builder.virtual_artifact("slow").unwrap();
    let next = builder.virtual_artifact("next").unwrap();
    builder
        .transform(
            &[slow.clone()],
            &[],
            Function::new("wait", |ctx: ApplyContext| async move {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(BeaverError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => ctx.write_output(0, "late").await,
                }
            }),
        )
        .unwrap();
    builder
        .transform(&[next], &[slow], Function::new("never", |ctx: ApplyContext| async move {
            ctx.write_output(0, "unreachable").await
        }))
        .unwrap();
    let graph = builder.build().unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Scheduler::new(&graph, store(&dir)).cancel_token(cancel).build(&["next"]),
    )
    .await
    .expect("build should stop promptly")
    .unwrap();

    assert_eq!(result.status("slow"), Some(TransformStatus::Cancelled));
    assert_eq!(result.status("next"), Some(TransformStatus::Cancelled));
    assert!(!result.is_success());
}

#[tokio::test]
async fn fail_fast_abandons_pending_work() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut builder = GraphBuilder::new(dir.path());
    let broken = builder.file("broken.txt").unwrap();
    let first = builder.virtual_artifact("first").unwrap();
    let second = builder.virtual_artifact("second").unwrap();
    builder
        .transform(&[broken], &[], Command::shell("exit 1"))
        .unwrap();
    builder
        .transform(&[first], &[], counted("first", &calls, "1"))
        .unwrap();
    builder
        .transform(&[second], &[], counted("second", &calls, "2"))
        .unwrap();
    let graph = builder.build().unwrap();

    let options = BuildOptions::default()
        .with_concurrency(1)
        .with_fail_fast(true);
    let result = scheduler::build(&graph, store(&dir), &["broken.txt", "first", "second"], options)
        .await
        .unwrap();

    assert_eq!(result.status("broken.txt"), Some(TransformStatus::Failed));
    assert_eq!(result.cancelled().len(), 2);
    assert_eq!(
        result.outcome("first").unwrap().reason.as_deref(),
        Some("build aborted after failure")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn new_input_set_forces_rerun() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", "a");
    write(&dir, "extra.txt", "extra");
    let store = store(&dir);

    let graph = copy_then_upper(dir.path());
    scheduler::build(&graph, store.clone(), &["b.txt"], BuildOptions::default())
        .await
        .unwrap();

    // Same output, one more input
    let mut builder = GraphBuilder::new(dir.path());
    let a = builder.file("a.txt").unwrap();
    let extra = builder.file("extra.txt").unwrap();
    let b = builder.file("b.txt").unwrap();
    builder
        .transform(&[b], &[a, extra], Command::shell("cat $^ > $@"))
        .unwrap();
    let graph = builder.build().unwrap();

    let result = scheduler::build(&graph, store, &["b.txt"], BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status("b.txt"), Some(TransformStatus::Succeeded));
    assert_eq!(read(&dir, "b.txt"), "aextra");
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_while_digesting_skips_apply() {
    let dir = TempDir::new().unwrap();
    let fifo = dir.path().join("pipe");
    let made = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
    assert!(made.success());
    let calls = Arc::new(AtomicUsize::new(0));

    // Digesting a FIFO blocks until something writes to it
    let mut builder = GraphBuilder::new(dir.path());
    let pipe = builder.file("pipe").unwrap();
    let out = builder.virtual_artifact("out").unwrap();
    builder
        .transform(&[out], &[pipe], counted("consume", &calls, "done"))
        .unwrap();
    let graph = builder.build().unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
        tokio::task::spawn_blocking(move || std::fs::write(fifo, "data"))
            .await
            .unwrap()
            .unwrap();
    });

    let options = BuildOptions::default().with_concurrency(1);
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Scheduler::new(&graph, store(&dir))
            .options(options)
            .cancel_token(cancel)
            .build(&["out"]),
    )
    .await
    .expect("build should stop once digesting finishes")
    .unwrap();

    assert_eq!(result.status("out"), Some(TransformStatus::Cancelled));
    assert_eq!(
        result.outcome("out").unwrap().reason.as_deref(),
        Some("build interrupted")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn undigestable_input_fails_only_its_consumer() {
    let dir = TempDir::new().unwrap();
    // A self-referencing symlink exists but cannot be read
    std::os::unix::fs::symlink("looped.txt", dir.path().join("looped.txt")).unwrap();

    let mut builder = GraphBuilder::new(dir.path());
    let looped = builder.file("looped.txt").unwrap();
    let copy = builder.file("copy.txt").unwrap();
    let other = builder.file("other.txt").unwrap();
    builder
        .transform(&[copy], &[looped], Command::shell("cp $< $@"))
        .unwrap();
    builder
        .transform(&[other], &[], Command::shell("echo ok > $@"))
        .unwrap();
    let graph = builder.build().unwrap();

    let result = scheduler::build(
        &graph,
        store(&dir),
        &["copy.txt", "other.txt"],
        BuildOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(result.status("copy.txt"), Some(TransformStatus::Failed));
    let reason = result.outcome("copy.txt").unwrap().reason.clone().unwrap();
    assert!(reason.starts_with("Cannot digest"), "{reason}");
    assert!(reason.contains("looped.txt"), "{reason}");
    assert_eq!(result.status("other.txt"), Some(TransformStatus::Succeeded));
    assert!(!dir.path().join("copy.txt").exists());
}

/// Persisted records of two independent transformations, `slow` finishing last
async fn records_with_slow(slow: &'static str) -> serde_json::Value {
    let dir = TempDir::new().unwrap();
    write(&dir, "seed.txt", "seed");

    let mut builder = GraphBuilder::new(dir.path());
    let seed = builder.file("seed.txt").unwrap();
    for name in ["left.txt", "right.txt"] {
        let output = builder.file(name).unwrap();
        let delay = Duration::from_millis(if name == slow { 300 } else { 0 });
        builder
            .transform(
                &[output],
                &[seed.clone()],
                Function::new(name, move |ctx: ApplyContext| async move {
                    tokio::time::sleep(delay).await;
                    ctx.write_output(0, "same").await
                }),
            )
            .unwrap();
    }
    let graph = builder.build().unwrap();

    let options = BuildOptions::default().with_concurrency(2);
    let result = scheduler::build(&graph, store(&dir), &["left.txt", "right.txt"], options)
        .await
        .unwrap();
    assert_eq!(result.succeeded().len(), 2);

    let mut persisted: serde_json::Value =
        serde_json::from_str(&read(&dir, ".beaverdigests")).unwrap();
    let records = persisted["records"].as_object_mut().unwrap();
    assert_eq!(records.len(), 2);
    for record in records.values_mut() {
        let record = record.as_object_mut().unwrap();
        record.remove("recorded_at");
        record.remove("duration_ms");
    }
    persisted
}

#[tokio::test]
async fn completion_order_does_not_change_records() {
    let left_last = records_with_slow("left.txt").await;
    let right_last = records_with_slow("right.txt").await;
    assert_eq!(left_last, right_last);
}
