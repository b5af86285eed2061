//! Download a URL into a file artifact

use super::{ApplyContext, Operation};
use crate::digest::{digest_path, Digest};
use crate::error::{BeaverError, BeaverResult};
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fetches a URL to the single file output
///
/// When the output declares an expected digest the fetch is skipped if the
/// file on disk already matches, and the downloaded content is verified.
#[derive(Debug, Clone)]
pub struct Download {
    url: String,
}

impl Download {
    /// Create a download transformation
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Operation for Download {
    async fn apply(&self, ctx: &ApplyContext) -> BeaverResult<()> {
        let transform = ctx.transform.as_str();
        let [output] = ctx.outputs.as_slice() else {
            return Err(BeaverError::execution(
                transform,
                "download requires exactly one output",
            ));
        };
        let path = output.path().ok_or_else(|| {
            BeaverError::execution(transform, "download output must be a file artifact")
        })?;
        let expected = output.expected_digest();

        if let Some(expected) = expected {
            if digest_path(path)? == Some(expected) {
                debug!(transform, url = %self.url, "existing download matches digest");
                return Ok(());
            }
        }

        info!(transform, url = %self.url, "downloading");
        let url = self.url.clone();
        let target = path.to_path_buf();
        let fetch = tokio::task::spawn_blocking(move || fetch(&url, &target));
        let fetched = tokio::select! {
            result = fetch => result
                .map_err(|e| BeaverError::execution(transform, format!("download task failed: {e}")))?,
            _ = ctx.cancel.cancelled() => return Err(BeaverError::Cancelled),
        };
        let actual = fetched.map_err(|reason| BeaverError::execution(transform, reason))?;

        if let Some(expected) = expected {
            if actual != expected {
                let _ = fs::remove_file(path);
                return Err(BeaverError::execution(
                    transform,
                    format!(
                        "expected digest {} but got {} for {}",
                        expected,
                        actual,
                        output.identity()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "download"
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Stream the response body to a sibling temp file, then move it into place
fn fetch(url: &str, target: &Path) -> Result<Digest, String> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| format!("GET {url}: {e}"))?;

    let partial = partial_path(target);
    let write = || -> io::Result<()> {
        let mut reader = response.into_body().into_reader();
        let mut file = fs::File::create(&partial)?;
        io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        fs::rename(&partial, target)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&partial);
        return Err(format!("writing {}: {e}", target.display()));
    }

    digest_path(target)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("{} vanished after download", target.display()))
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}
