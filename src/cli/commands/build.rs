//! Build command - bring targets up to date

use super::Project;
use crate::cli::args::{BuildArgs, OutputFormat};
use crate::error::BeaverResult;
use crate::event_log::EventLog;
use crate::scheduler::{BuildOptions, BuildResult, Scheduler};
use crate::store::StalenessStore;
use crate::ui::{self, BuildProgress, UiContext};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Execute the build command
pub async fn execute(
    args: BuildArgs,
    project: &Project,
    cancel: CancellationToken,
) -> BeaverResult<ExitCode> {
    let ctx = match args.format {
        OutputFormat::Table => UiContext::detect(),
        OutputFormat::Json | OutputFormat::Plain => UiContext::non_interactive(),
    };

    let (manifest, graph) = project.load(args.file.as_deref()).await?;
    let targets = graph.select(&args.targets)?;

    let store = Arc::new(StalenessStore::open(project.digest_path(args.digest_file.as_deref())).await);
    let options = build_options(&args, project);
    debug!(
        concurrency = options.concurrency,
        store = %store.path().display(),
        "Build options resolved"
    );

    // Config [env], then manifest [env], then --env
    let mut env: HashMap<String, String> = project.config.env.clone().into_iter().collect();
    env.extend(manifest.env.clone());
    env.extend(args.env.iter().cloned());

    if args.format == OutputFormat::Table {
        ui::intro(&ctx, if options.dry_run { "beaver build --dry-run" } else { "beaver build" });
    }

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let event_log = EventLog::new(&project.root, project.config.general.event_log);
    let progress = (args.format == OutputFormat::Table).then(|| BuildProgress::new(&ctx));
    let consumer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Some(progress) = &progress {
                progress.on_event(&event);
            }
            event_log.log(&event).await;
        }
        if let Some(progress) = progress {
            progress.finish();
        }
    });

    let scheduler = Scheduler::new(&graph, store)
        .options(options)
        .env(env)
        .events(sender)
        .cancel_token(cancel);
    let result = scheduler.build(&targets).await;
    // Closes the event channel
    drop(scheduler);
    consumer.await.ok();
    let result = result?;

    match args.format {
        OutputFormat::Table => print_table(&ctx, &result),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Plain => print_plain(&result),
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_options(args: &BuildArgs, project: &Project) -> BuildOptions {
    let mut options = BuildOptions::default()
        .with_dry_run(args.dry_run)
        .with_fail_fast(args.fail_fast || project.config.build.fail_fast);
    if let Some(jobs) = args.jobs.map(usize::from).or(project.config.build.concurrency) {
        options = options.with_concurrency(jobs);
    }
    options
}

fn print_table(ctx: &UiContext, result: &BuildResult) {
    ui::build_report(ctx, result);

    let summary = ui::summary_line(result);
    if !result.is_success() {
        ui::outro_error(ctx, &summary);
    } else if result.would_run().is_empty() {
        ui::outro_success(ctx, &summary);
    } else {
        ui::outro_warn(ctx, &summary);
    }
}

fn print_plain(result: &BuildResult) {
    for outcome in &result.outcomes {
        println!("{}\t{}", outcome.status, outcome.transform);
    }
}
