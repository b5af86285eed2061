//! Build manifest parsing
//!
//! A project describes its build in `beaver.toml`: optional explicit artifact
//! declarations, transformations, groups and an environment table for command
//! transformations. Names used by a transformation but never declared are
//! file artifacts.

use crate::artifact::{Artifact, ArtifactKind};
use crate::digest::Digest;
use crate::error::{BeaverError, BeaverResult};
use crate::graph::{BuildGraph, GraphBuilder};
use crate::transform::{Command, Download, Noop, Operation};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Parsed `beaver.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildManifest {
    /// Environment for command transformations, merged over the config `[env]`
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<ArtifactDecl>,

    #[serde(default, rename = "transform")]
    pub transforms: Vec<TransformDecl>,

    #[serde(default, rename = "group")]
    pub groups: Vec<GroupDecl>,

    #[serde(skip)]
    source: PathBuf,
}

/// Explicit artifact declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactDecl {
    pub name: String,

    #[serde(default)]
    pub kind: KindDecl,

    /// Hex SHA-256 the artifact must match
    pub expected_digest: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindDecl {
    #[default]
    File,
    Phony,
    Virtual,
}

impl From<KindDecl> for ArtifactKind {
    fn from(kind: KindDecl) -> Self {
        match kind {
            KindDecl::File => ArtifactKind::File,
            KindDecl::Phony => ArtifactKind::Phony,
            KindDecl::Virtual => ArtifactKind::Virtual,
        }
    }
}

/// Transformation declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformDecl {
    pub kind: OperationDecl,

    pub outputs: Vec<String>,

    #[serde(default)]
    pub inputs: Vec<String>,

    /// Command line: a string for `shell`, an array for `subprocess`
    pub cmd: Option<CommandDecl>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Source URL for `download`
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationDecl {
    Shell,
    Subprocess,
    Download,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandDecl {
    Line(String),
    Argv(Vec<String>),
}

/// Named phony target building all of its members
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDecl {
    pub name: String,
    pub members: Vec<String>,
}

impl BuildManifest {
    /// Parse a manifest from a TOML file on disk
    pub async fn from_file(path: &Path) -> BeaverResult<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BeaverError::ManifestNotFound(path.to_path_buf()));
            }
            Err(e) => {
                return Err(BeaverError::io(
                    format!("reading build manifest {}", path.display()),
                    e,
                ))
            }
        };
        let mut manifest = Self::parse(&content).map_err(|e| match e {
            BeaverError::ManifestInvalid { reason, .. } => BeaverError::ManifestInvalid {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        manifest.source = path.to_path_buf();
        Ok(manifest)
    }

    /// Parse a manifest from a TOML string
    pub fn parse(content: &str) -> BeaverResult<Self> {
        let mut manifest: Self =
            toml::from_str(content).map_err(|e| BeaverError::ManifestInvalid {
                path: "beaver.toml".into(),
                reason: e.to_string(),
            })?;
        manifest.source = PathBuf::from("beaver.toml");
        Ok(manifest)
    }

    /// Path the manifest was read from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Declare everything in the manifest and freeze it into a graph
    ///
    /// The manifest `[env]` is not applied here; callers overlay it on the
    /// configured environment handed to the scheduler.
    pub fn into_graph(&self, root: &Path) -> BeaverResult<BuildGraph> {
        let mut builder = GraphBuilder::new(root);

        for decl in &self.artifacts {
            let expected = decl
                .expected_digest
                .as_deref()
                .map(|hex| hex.parse::<Digest>())
                .transpose()
                .map_err(|reason| self.invalid(reason))?;
            builder
                .declare(&decl.name, decl.kind.into(), expected)
                .map_err(|e| self.invalid(e.to_string()))?;
        }

        for (index, decl) in self.transforms.iter().enumerate() {
            let operation = self.operation(index, decl)?;
            let outputs = self.artifacts_for(&mut builder, &decl.outputs)?;
            let inputs = self.artifacts_for(&mut builder, &decl.inputs)?;

            if let Some(output) = outputs.iter().find(|o| o.kind() == ArtifactKind::Virtual) {
                return Err(self.invalid(format!(
                    "virtual artifact {} can only be produced in-process",
                    output.identity()
                )));
            }

            let id = builder.transform_dyn(&outputs, &inputs, operation)?;
            debug!(transform = %id, "manifest_transform_declared");
        }

        for group in &self.groups {
            let members = self.artifacts_for(&mut builder, &group.members)?;
            builder.aggregate(&group.name, &members)?;
        }

        builder.build()
    }

    fn operation(&self, index: usize, decl: &TransformDecl) -> BeaverResult<Arc<dyn Operation>> {
        let at = || format!("transform #{} ({})", index + 1, decl.outputs.join(", "));
        if decl.url.is_some() && decl.kind != OperationDecl::Download {
            return Err(self.invalid(format!("{}: `url` is only valid for download", at())));
        }
        if decl.cmd.is_some() && matches!(decl.kind, OperationDecl::Download | OperationDecl::Noop)
        {
            return Err(self.invalid(format!("{}: `cmd` is not valid here", at())));
        }

        let operation: Arc<dyn Operation> = match (decl.kind, &decl.cmd) {
            (OperationDecl::Shell, Some(CommandDecl::Line(line))) => {
                Arc::new(with_env(Command::shell(line), &decl.env))
            }
            (OperationDecl::Subprocess, Some(CommandDecl::Argv(argv))) if !argv.is_empty() => {
                Arc::new(with_env(Command::subprocess(argv), &decl.env))
            }
            (OperationDecl::Shell, _) => {
                return Err(self.invalid(format!("{}: shell needs `cmd` as a string", at())));
            }
            (OperationDecl::Subprocess, _) => {
                return Err(self.invalid(format!(
                    "{}: subprocess needs `cmd` as a non-empty array",
                    at()
                )));
            }
            (OperationDecl::Download, _) => match &decl.url {
                Some(url) => Arc::new(Download::new(url)),
                None => return Err(self.invalid(format!("{}: download needs `url`", at()))),
            },
            (OperationDecl::Noop, _) => Arc::new(Noop),
        };
        Ok(operation)
    }

    fn artifacts_for(
        &self,
        builder: &mut GraphBuilder,
        names: &[String],
    ) -> BeaverResult<Vec<Arc<Artifact>>> {
        names
            .iter()
            .map(|name| {
                let id = name.trim_start_matches('/');
                match builder.artifact(id) {
                    Some(existing) => Ok(existing),
                    None => builder.file(id),
                }
            })
            .collect()
    }

    fn invalid(&self, reason: impl Into<String>) -> BeaverError {
        BeaverError::ManifestInvalid {
            path: self.source.clone(),
            reason: reason.into(),
        }
    }
}

fn with_env(mut command: Command, env: &BTreeMap<String, String>) -> Command {
    for (key, value) in env {
        command = command.env(key, value);
    }
    command
}
