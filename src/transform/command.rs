//! Subprocess and shell command transformations
//!
//! Command lines support Makefile-style substitution:
//! - `$@` first output
//! - `$<` first input (empty when there are none)
//! - `$^` all inputs, space separated
//! - `{outputs[N]}` / `{inputs[N]}` the N-th output or input, from zero
//!
//! `$$` produces a literal `$`.
//!
//! On unix each command runs in its own process group so cancellation
//! reaches everything it started.

use super::{ApplyContext, Operation};
use crate::error::{BeaverError, BeaverResult};
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as ProcessCommand};
use tracing::{debug, warn};

static SUBSTITUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$([@<^])|\{(outputs|inputs)\[(\d+)\]\}")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Time a child gets to exit after SIGTERM before it is killed
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Longest stderr excerpt carried in an execution error
const STDERR_EXCERPT: usize = 2048;

/// How the command is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Passed to `sh -c`
    Shell(String),
    /// Executed directly; the first element is the program
    Argv(Vec<String>),
}

impl CommandLine {
    fn kind(&self) -> &'static str {
        match self {
            Self::Shell(_) => "shell",
            Self::Argv(_) => "subprocess",
        }
    }
}

/// Runs a shell command or a subprocess
#[derive(Debug, Clone)]
pub struct Command {
    line: CommandLine,
    env: BTreeMap<String, Option<String>>,
    grace_period: Duration,
}

impl Command {
    /// Create a shell command transformation
    pub fn shell(cmd: impl Into<String>) -> Self {
        Self::new(CommandLine::Shell(cmd.into()))
    }

    /// Create a subprocess transformation from an argument vector
    pub fn subprocess<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(CommandLine::Argv(argv.into_iter().map(Into::into).collect()))
    }

    fn new(line: CommandLine) -> Self {
        Self {
            line,
            env: BTreeMap::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Set an environment variable for this command only
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove an inherited environment variable for this command
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    /// Override the SIGTERM grace period used on cancellation
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn line(&self) -> &CommandLine {
        &self.line
    }

    /// Build the process for the given context, substitutions applied
    fn prepare(&self, ctx: &ApplyContext) -> BeaverResult<ProcessCommand> {
        let vars = Substitutions::from_context(ctx);

        let mut process = match &self.line {
            CommandLine::Shell(cmd) => {
                let mut process = ProcessCommand::new("sh");
                process.arg("-c").arg(vars.expand(cmd)?);
                process
            }
            CommandLine::Argv(argv) => {
                let args = vars.expand_argv(argv)?;
                let (program, rest) = args.split_first().ok_or_else(|| {
                    BeaverError::execution(ctx.transform.as_str(), "empty command")
                })?;
                let mut process = ProcessCommand::new(program);
                process.args(rest);
                process
            }
        };

        process
            .current_dir(&ctx.root)
            .envs(ctx.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        for (key, value) in &self.env {
            match value {
                Some(value) => process.env(key, value),
                None => process.env_remove(key),
            };
        }

        Ok(process)
    }
}

#[async_trait]
impl Operation for Command {
    async fn apply(&self, ctx: &ApplyContext) -> BeaverResult<()> {
        let transform = ctx.transform.as_str();
        let mut process = self.prepare(ctx)?;
        debug!(transform, command = ?process.as_std(), "spawning");

        let mut child = process
            .spawn()
            .map_err(|e| BeaverError::execution(transform, format!("failed to spawn: {e}")))?;

        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| BeaverError::execution(transform, format!("wait failed: {e}")))?,
            _ = ctx.cancel.cancelled() => {
                interrupt(&mut child, self.grace_period).await;
                return Err(BeaverError::Cancelled);
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();
        if !stdout.is_empty() {
            debug!(transform, stdout = %String::from_utf8_lossy(&stdout).trim_end(), "output");
        }

        if status.success() {
            return Ok(());
        }

        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let mut reason = format!("{} exited with status {}", self.line.kind(), code);
        let stderr = String::from_utf8_lossy(&stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            let start = stderr.len().saturating_sub(STDERR_EXCERPT);
            let start = (start..stderr.len())
                .find(|i| stderr.is_char_boundary(*i))
                .unwrap_or(stderr.len());
            reason.push_str(": ");
            reason.push_str(&stderr[start..]);
        }
        Err(BeaverError::execution(transform, reason))
    }

    fn kind(&self) -> &'static str {
        self.line.kind()
    }

    fn describe(&self) -> String {
        match &self.line {
            CommandLine::Shell(cmd) => cmd.clone(),
            CommandLine::Argv(argv) => argv.join(" "),
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

/// Forward SIGTERM, then kill the child if it outlives the grace period
async fn interrupt(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        if signal_group(pid, "TERM").await
            && tokio::time::timeout(grace, child.wait()).await.is_ok()
        {
            return;
        }
        signal_group(pid, "KILL").await;
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!("Failed to kill cancelled command: {}", e);
    }
}

/// Send `signal` to the process group led by `pid`
#[cfg(unix)]
async fn signal_group(pid: u32, signal: &str) -> bool {
    let group = format!("-{pid}");
    match ProcessCommand::new("kill")
        .args(["-s", signal, "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            warn!("Failed to signal command group {}: {}", pid, e);
            false
        }
    }
}

/// Values of the automatic variables for one invocation
struct Substitutions {
    transform: String,
    outputs: Vec<String>,
    inputs: Vec<String>,
}

impl Substitutions {
    fn from_context(ctx: &ApplyContext) -> Self {
        let names = |artifacts: &[std::sync::Arc<crate::artifact::Artifact>]| {
            artifacts.iter().map(|a| a.identity().to_string()).collect()
        };
        Self {
            transform: ctx.transform.to_string(),
            outputs: names(&ctx.outputs),
            inputs: names(&ctx.inputs),
        }
    }

    fn expand(&self, text: &str) -> BeaverResult<String> {
        let mut expanded = String::with_capacity(text.len());
        let mut last = 0;
        for caps in SUBSTITUTION.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            expanded.push_str(&text[last..whole.start()]);
            expanded.push_str(&self.value(&caps)?);
            last = whole.end();
        }
        expanded.push_str(&text[last..]);
        Ok(expanded)
    }

    fn value(&self, caps: &Captures) -> BeaverResult<Cow<'_, str>> {
        if let Some(var) = caps.get(1) {
            return Ok(match var.as_str() {
                "@" => Cow::Borrowed(first(&self.outputs)),
                "<" => Cow::Borrowed(first(&self.inputs)),
                _ => Cow::Owned(self.inputs.join(" ")),
            });
        }
        let (Some(list), Some(index)) = (caps.get(2), caps.get(3)) else {
            return Ok(Cow::Borrowed("$"));
        };
        let names = match list.as_str() {
            "outputs" => &self.outputs,
            _ => &self.inputs,
        };
        index
            .as_str()
            .parse::<usize>()
            .ok()
            .and_then(|i| names.get(i))
            .map(|name| Cow::Borrowed(name.as_str()))
            .ok_or_else(|| {
                BeaverError::execution(
                    &self.transform,
                    format!(
                        "{} is out of range ({} {} declared)",
                        &caps[0],
                        names.len(),
                        list.as_str()
                    ),
                )
            })
    }

    /// An argument that is exactly `$^` expands to one argument per input
    fn expand_argv(&self, argv: &[String]) -> BeaverResult<Vec<String>> {
        let mut args = Vec::with_capacity(argv.len());
        for arg in argv {
            if arg == "$^" {
                args.extend(self.inputs.iter().cloned());
            } else {
                args.push(self.expand(arg)?);
            }
        }
        Ok(args)
    }
}

fn first(names: &[String]) -> &str {
    names.first().map(String::as_str).unwrap_or_default()
}
