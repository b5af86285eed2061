//! Build progress display with CI fallback

use super::context::UiContext;
use crate::scheduler::BuildEvent;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Longest transformation name shown in the bar message
const MESSAGE_WIDTH: usize = 60;

/// Progress of a running build, fed by scheduler events
///
/// Shows an indicatif bar in interactive mode; in CI every started or failed
/// transformation gets a plain line.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(0);
            let template = ProgressStyle::default_bar().template(
                "  {spinner:.cyan} {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
            );
            if let Ok(template) = template {
                bar.set_style(
                    template
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .progress_chars("━╸─"),
                );
            }
            bar.set_prefix("Building");
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self { bar }
    }

    /// Update the display for one scheduler event
    pub fn on_event(&self, event: &BuildEvent) {
        match (&self.bar, event) {
            (Some(bar), BuildEvent::Started { transformations, dry_run, .. }) => {
                bar.set_length(*transformations as u64);
                if *dry_run {
                    bar.set_prefix("Checking");
                }
            }
            (Some(bar), BuildEvent::Executing { transform, .. }) => {
                bar.set_message(truncate(transform.as_str()));
            }
            (Some(bar), BuildEvent::Failed { transform, reason, .. }) => {
                bar.println(format!(
                    "  {} {}: {}",
                    style("✗").red(),
                    transform,
                    style(first_line(reason)).red()
                ));
                bar.inc(1);
            }
            (Some(bar), event) if event.is_terminal() => bar.inc(1),
            (None, BuildEvent::Executing { description, .. }) => {
                println!("{} {}", style("...").dim(), description);
            }
            (None, BuildEvent::Failed { transform, reason, .. }) => {
                println!("{} {}: {}", style("[FAIL]").red(), transform, first_line(reason));
            }
            _ => {}
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn truncate(name: &str) -> String {
    if name.chars().count() > MESSAGE_WIDTH {
        let head: String = name.chars().take(MESSAGE_WIDTH - 3).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}
