//! Output functions for consistent CLI formatting

use super::context::UiContext;
use crate::scheduler::{BuildResult, Outcome, TransformStatus};
use console::style;
use std::time::Duration;

/// Display intro banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
    }
}

/// Display success outro
pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).green().bold()).ok();
    } else {
        println!("{} {}", style("[OK]").green(), message);
    }
}

/// Display error outro
pub fn outro_error(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).red().bold()).ok();
    } else {
        println!("{} {}", style("[ERROR]").red(), message);
    }
}

/// Display warning outro
pub fn outro_warn(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).yellow().bold()).ok();
    } else {
        println!("{} {}", style("[WARN]").yellow(), message);
    }
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::success(message).ok();
    } else {
        println!("  {} {}", style("[OK]").green(), message);
    }
}

/// Display a success step with detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::success(format!("{} ({})", message, style(detail).dim())).ok();
    } else {
        println!("  {} {} ({})", style("[OK]").green(), message, detail);
    }
}

/// Display a warning step with hint
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::warning(format!("{} - {}", message, style(hint).dim())).ok();
    } else {
        println!("  {} {} - {}", style("[WARN]").yellow(), message, hint);
    }
}

/// Display an error step with detail
pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::error(format!("{}: {}", message, style(detail).red())).ok();
    } else {
        println!("  {} {}: {}", style("[FAIL]").red(), message, detail);
    }
}

/// Display an info step
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::info(message).ok();
    } else {
        println!("  {} {}", style("[INFO]").cyan(), message);
    }
}

/// Display a skipped step with its cause
pub fn step_skipped(ctx: &UiContext, name: &str, reason: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::info(format!(
            "{} - {}",
            style(name).dim(),
            style(format!("skipped ({})", reason)).dim()
        ))
        .ok();
    } else {
        println!("  {} {} ({})", style("[-]").dim(), name, reason);
    }
}

/// Display a remark/hint
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::remark(message).ok();
    } else {
        println!("  {}", style(message).dim());
    }
}

/// Print styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}

/// Print one line per transformation of a finished build
pub fn build_report(ctx: &UiContext, result: &BuildResult) {
    for outcome in &result.outcomes {
        outcome_line(ctx, outcome);
    }
}

fn outcome_line(ctx: &UiContext, outcome: &Outcome) {
    let name = outcome.transform.as_str();
    let reason = outcome.reason.as_deref().unwrap_or_default();
    match outcome.status {
        TransformStatus::Succeeded => {
            step_ok_detail(ctx, name, &format_duration(outcome.duration))
        }
        TransformStatus::Fresh => remark(ctx, &format!("{} is up to date", name)),
        TransformStatus::Failed => step_error_detail(ctx, name, reason),
        TransformStatus::Cancelled => step_skipped(ctx, name, reason),
        TransformStatus::WouldRun => step_info(ctx, &format!("{} would run: {}", name, reason)),
    }
}

/// One-line count of outcomes, e.g. "2 succeeded, 1 up to date"
pub fn summary_line(result: &BuildResult) -> String {
    let parts: Vec<String> = [
        TransformStatus::Succeeded,
        TransformStatus::Fresh,
        TransformStatus::WouldRun,
        TransformStatus::Failed,
        TransformStatus::Cancelled,
    ]
    .into_iter()
    .filter_map(|status| match result.count(status) {
        0 => None,
        n => Some(format!("{} {}", n, status)),
    })
    .collect();

    if parts.is_empty() {
        "nothing to do".to_string()
    } else {
        format!("{} in {}", parts.join(", "), format_duration(result.duration))
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactId;
    use crate::transform::TransformId;

    fn outcome(name: &str, status: TransformStatus) -> Outcome {
        Outcome {
            transform: TransformId::from_outputs([&ArtifactId::new(name)]),
            status,
            reason: Some("dependency [a] failed".to_string()),
            duration: Duration::from_millis(250),
        }
    }

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        // These should not panic
        intro(&ctx, "Test");
        outro_success(&ctx, "Done");
        step_ok(&ctx, "Step completed");
        step_skipped(&ctx, "b", "dependency [a] failed");
    }

    #[test]
    fn summary_counts_statuses() {
        let result = BuildResult {
            outcomes: vec![
                outcome("a", TransformStatus::Failed),
                outcome("b", TransformStatus::Cancelled),
                outcome("c", TransformStatus::Fresh),
            ],
            duration: Duration::from_millis(1500),
        };
        build_report(&UiContext::non_interactive(), &result);
        assert_eq!(
            summary_line(&result),
            "1 up to date, 1 failed, 1 cancelled in 1.5s"
        );
    }

    #[test]
    fn empty_summary() {
        assert_eq!(summary_line(&BuildResult::default()), "nothing to do");
    }
}
