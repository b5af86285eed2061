//! Terminal output for the CLI
//!
//! Uses `cliclack` log lines and an `indicatif` progress bar in interactive
//! terminals, with automatic fallback to plain output in CI/non-interactive
//! environments.
//!
//! # Example
//!
//! ```rust,ignore
//! use beaver::ui::{self, BuildProgress, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "beaver build");
//!
//! let progress = BuildProgress::new(&ctx);
//! // feed scheduler events: progress.on_event(&event)
//! progress.finish();
//!
//! ui::build_report(&ctx, &result);
//! ui::outro_success(&ctx, &ui::summary_line(&result));
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    build_report, intro, key_value, outro_error, outro_success, outro_warn, remark, step_error_detail,
    step_info, step_ok, step_ok_detail, step_skipped, step_warn_hint, summary_line,
};
pub use progress::BuildProgress;
