//! CLI command implementations

pub mod build;
pub mod completions;
pub mod config;
pub mod forget;
pub mod list;

pub use build::execute as build;
pub use completions::execute as completions;
pub use config::execute as config;
pub use forget::execute as forget;
pub use list::execute as list;

use crate::config::Config;
use crate::error::BeaverResult;
use crate::graph::BuildGraph;
use crate::manifest::BuildManifest;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Build root and merged configuration shared by the project commands
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
}

impl Project {
    pub fn new(root: PathBuf, config: Config) -> Self {
        Self { root, config }
    }

    /// Manifest location: explicit file, else the configured name in the root
    pub fn manifest_path(&self, file: Option<&Path>) -> PathBuf {
        match file {
            Some(file) => self.root.join(file),
            None => self.root.join(&self.config.build.manifest),
        }
    }

    /// Staleness store location: explicit path, else the configured name in the root
    pub fn digest_path(&self, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) => self.root.join(path),
            None => self.root.join(&self.config.build.digest_file),
        }
    }

    /// Read the manifest and freeze its declarations into a graph
    pub async fn load(&self, file: Option<&Path>) -> BeaverResult<(BuildManifest, BuildGraph)> {
        let path = self.manifest_path(file);
        debug!("Loading build manifest {}", path.display());
        let manifest = BuildManifest::from_file(&path).await?;
        let graph = manifest.into_graph(&self.root)?;
        Ok((manifest, graph))
    }
}
