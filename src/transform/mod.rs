//! Transformations: operations producing output artifacts from inputs
//!
//! A [`Transformation`] pairs statically declared input and output artifacts
//! with an [`Operation`], the single polymorphic capability (`apply`) that
//! built-in and host-supplied kinds implement:
//! - [`Command`]: subprocess or shell command with Makefile-style substitution
//! - [`Function`]: in-process async closure
//! - [`Download`]: fetch a URL into a file output
//! - [`Noop`]: composite/group marker

pub mod command;
pub mod download;
pub mod function;
pub mod noop;

pub use command::{Command, CommandLine};
pub use download::Download;
pub use function::Function;
pub use noop::Noop;

use crate::artifact::{Artifact, ArtifactId, ArtifactKind};
use crate::error::{BeaverError, BeaverResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Identity of a transformation, derived from its output set
///
/// Output identities are sorted and joined with ", ", so the identity does
/// not depend on declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformId(String);

impl TransformId {
    /// Derive the identity from output artifact identities
    pub fn from_outputs<'a>(outputs: impl IntoIterator<Item = &'a ArtifactId>) -> Self {
        let mut names: Vec<&str> = outputs.into_iter().map(ArtifactId::as_str).collect();
        names.sort_unstable();
        names.dedup();
        Self(names.join(", "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything an operation may touch while it runs
///
/// Cheap to clone: artifacts and the environment are shared.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    /// Identity of the running transformation
    pub transform: TransformId,
    /// Resolved input artifacts, in declaration order
    pub inputs: Vec<Arc<Artifact>>,
    /// Output artifacts, in declaration order
    pub outputs: Vec<Arc<Artifact>>,
    /// Build root; commands run with this working directory
    pub root: PathBuf,
    /// Global environment for subprocesses
    pub env: Arc<HashMap<String, String>>,
    /// Interruption signal for long-running operations
    pub cancel: CancellationToken,
}

impl ApplyContext {
    /// Read the content of an input artifact
    pub async fn read_input(&self, index: usize) -> BeaverResult<Vec<u8>> {
        let artifact = self.inputs.get(index).ok_or_else(|| {
            BeaverError::execution(self.transform.as_str(), format!("no input #{index}"))
        })?;
        read_artifact(artifact).await
    }

    /// Write the content of an output artifact
    pub async fn write_output(&self, index: usize, data: impl Into<Vec<u8>>) -> BeaverResult<()> {
        let artifact = self.outputs.get(index).ok_or_else(|| {
            BeaverError::execution(self.transform.as_str(), format!("no output #{index}"))
        })?;
        write_artifact(artifact, data.into()).await
    }
}

async fn read_artifact(artifact: &Artifact) -> BeaverResult<Vec<u8>> {
    match (artifact.kind(), artifact.path()) {
        (ArtifactKind::File, Some(path)) => tokio::fs::read(path).await.map_err(|e| {
            BeaverError::resource(artifact.identity().as_str(), e.to_string())
        }),
        (ArtifactKind::Virtual, _) => artifact.read_value().ok_or_else(|| {
            BeaverError::resource(artifact.identity().as_str(), "virtual artifact has no value")
        }),
        _ => Err(BeaverError::resource(
            artifact.identity().as_str(),
            format!("{} artifacts have no content", artifact.kind()),
        )),
    }
}

async fn write_artifact(artifact: &Artifact, data: Vec<u8>) -> BeaverResult<()> {
    match (artifact.kind(), artifact.path()) {
        (ArtifactKind::File, Some(path)) => {
            ensure_parent_dir(path).await?;
            tokio::fs::write(path, data)
                .await
                .map_err(|e| BeaverError::io(format!("writing {}", path.display()), e))
        }
        (ArtifactKind::Virtual, _) => {
            artifact.write_value(data);
            Ok(())
        }
        _ => Err(BeaverError::resource(
            artifact.identity().as_str(),
            format!("{} artifacts cannot hold content", artifact.kind()),
        )),
    }
}

async fn ensure_parent_dir(path: &Path) -> BeaverResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BeaverError::io(format!("creating directory {}", parent.display()), e))?;
    }
    Ok(())
}

/// The `apply` capability every transformation kind provides
///
/// `apply` must be idempotent with respect to the declared outputs: running
/// it twice with unchanged inputs yields outputs with unchanged digests.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Produce the outputs from the inputs
    async fn apply(&self, ctx: &ApplyContext) -> BeaverResult<()>;

    /// Short name of the operation kind
    fn kind(&self) -> &'static str;

    /// Human-readable description for logs
    fn describe(&self) -> String {
        self.kind().to_string()
    }
}

/// A declared transformation: static inputs, static outputs and an operation
#[derive(Clone)]
pub struct Transformation {
    id: TransformId,
    inputs: Vec<Arc<Artifact>>,
    outputs: Vec<Arc<Artifact>>,
    operation: Arc<dyn Operation>,
}

impl Transformation {
    /// Create a transformation
    ///
    /// Fails if no outputs are declared.
    pub fn new(
        outputs: Vec<Arc<Artifact>>,
        inputs: Vec<Arc<Artifact>>,
        operation: Arc<dyn Operation>,
    ) -> BeaverResult<Self> {
        if outputs.is_empty() {
            return Err(BeaverError::InvalidTransform(format!(
                "{} transformation declares no outputs",
                operation.kind()
            )));
        }
        let id = TransformId::from_outputs(outputs.iter().map(|a| a.identity()));
        Ok(Self {
            id,
            inputs,
            outputs,
            operation,
        })
    }

    pub fn id(&self) -> &TransformId {
        &self.id
    }

    pub fn inputs(&self) -> &[Arc<Artifact>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Arc<Artifact>] {
        &self.outputs
    }

    pub fn operation(&self) -> &dyn Operation {
        self.operation.as_ref()
    }

    /// Run the operation and check that every output was generated
    ///
    /// Parent directories of file outputs are created beforehand. Output
    /// digests are refreshed afterwards.
    pub async fn execute(&self, ctx: &ApplyContext) -> BeaverResult<()> {
        for output in &self.outputs {
            if let Some(path) = output.path() {
                ensure_parent_dir(path).await?;
            }
        }

        self.operation.apply(ctx).await?;

        for output in &self.outputs {
            let digest = output.refresh()?;
            if digest.is_none() && !output.absence_is_acceptable() {
                return Err(BeaverError::execution(
                    self.id.as_str(),
                    format!("{} did not generate {}", self, output.identity()),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |artifacts: &[Arc<Artifact>]| {
            artifacts
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{}([{}] -> [{}])",
            self.operation.kind(),
            join(&self.inputs),
            join(&self.outputs)
        )
    }
}

impl fmt::Debug for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformation")
            .field("id", &self.id)
            .field("kind", &self.operation.kind())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(t: &Transformation, root: &Path) -> ApplyContext {
        ApplyContext {
            transform: t.id().clone(),
            inputs: t.inputs().to_vec(),
            outputs: t.outputs().to_vec(),
            root: root.to_path_buf(),
            env: Arc::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn identity_is_order_independent() {
        let a = ArtifactId::new("a.txt");
        let b = ArtifactId::new("b.txt");
        assert_eq!(
            TransformId::from_outputs([&a, &b]),
            TransformId::from_outputs([&b, &a])
        );
        assert_eq!(TransformId::from_outputs([&b, &a]).as_str(), "a.txt, b.txt");
    }

    #[test]
    fn rejects_empty_outputs() {
        let result = Transformation::new(vec![], vec![], Arc::new(Noop));
        assert!(matches!(result, Err(BeaverError::InvalidTransform(_))));
    }

    #[tokio::test]
    async fn execute_fails_on_missing_output() {
        let dir = TempDir::new().unwrap();
        let output = Arc::new(Artifact::file("output.txt", dir.path()));
        let t = Transformation::new(vec![output], vec![], Arc::new(Noop)).unwrap();

        let err = t.execute(&context(&t, dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("did not generate output.txt"));
    }

    #[tokio::test]
    async fn context_reads_and_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("in.txt"), "payload").unwrap();
        let input = Arc::new(Artifact::file("in.txt", dir.path()));
        let file_out = Arc::new(Artifact::file("nested/out.txt", dir.path()));
        let virtual_out = Arc::new(Artifact::virtual_artifact("value"));
        let t = Transformation::new(
            vec![file_out.clone(), virtual_out.clone()],
            vec![input],
            Arc::new(Noop),
        )
        .unwrap();
        let ctx = context(&t, dir.path());

        let data = ctx.read_input(0).await.unwrap();
        ctx.write_output(0, data.clone()).await.unwrap();
        ctx.write_output(1, data).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("nested/out.txt")).unwrap(),
            "payload"
        );
        assert_eq!(virtual_out.read_value().unwrap(), b"payload");
        assert!(ctx.read_input(3).await.is_err());
    }

    #[test]
    fn display_lists_artifacts() {
        let root = Path::new("/b");
        let t = Transformation::new(
            vec![Arc::new(Artifact::file("b.txt", root))],
            vec![Arc::new(Artifact::file("a.txt", root))],
            Arc::new(Noop),
        )
        .unwrap();
        assert_eq!(t.to_string(), "noop([File(a.txt)] -> [File(b.txt)])");
    }
}
