//! Forget command - drop staleness records to force rebuilds

use super::Project;
use crate::cli::args::ForgetArgs;
use crate::error::BeaverResult;
use crate::store::StalenessStore;
use crate::transform::TransformId;
use crate::ui::{self, UiContext};

/// Execute the forget command
pub async fn execute(args: ForgetArgs, project: &Project) -> BeaverResult<()> {
    let ctx = UiContext::detect();
    let store = StalenessStore::open(project.digest_path(args.digest_file.as_deref())).await;

    let removed = if args.all {
        store.clear()
    } else {
        let (_, graph) = project.load(args.file.as_deref()).await?;
        let mut ids: Vec<TransformId> = Vec::new();
        for target in graph.select(&args.targets)? {
            match graph.producer(target.as_str()) {
                Some(producer) if !ids.contains(producer.id()) => ids.push(producer.id().clone()),
                Some(_) => {}
                None => ui::step_warn_hint(
                    &ctx,
                    &format!("{} has no producer", target),
                    "Sources are never recorded",
                ),
            }
        }
        store.forget(&ids)
    };

    if removed > 0 || args.all {
        store.flush().await?;
    }

    if removed == 0 {
        ui::step_info(&ctx, "No staleness records matched");
    } else {
        ui::step_ok_detail(
            &ctx,
            &format!("Forgot {} record(s)", removed),
            &store.path().display().to_string(),
        );
    }
    Ok(())
}
