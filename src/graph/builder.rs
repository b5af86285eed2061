//! Explicit registry for declaring artifacts and transformations

use super::BuildGraph;
use crate::artifact::{Artifact, ArtifactId, ArtifactKind};
use crate::digest::Digest;
use crate::error::{BeaverError, BeaverResult};
use crate::transform::{Noop, Operation, TransformId, Transformation};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Collects declarations and produces a validated [`BuildGraph`]
///
/// There is no process-wide default graph: every declaration goes through a
/// builder owned by the host.
#[derive(Debug)]
pub struct GraphBuilder {
    root: PathBuf,
    artifacts: IndexMap<ArtifactId, Arc<Artifact>>,
    transforms: IndexMap<TransformId, Arc<Transformation>>,
    producers: HashMap<ArtifactId, TransformId>,
    prefixes: Vec<String>,
    /// Artifacts declared inside each open group, innermost last
    members: Vec<Vec<Arc<Artifact>>>,
}

impl GraphBuilder {
    /// Create a builder resolving file artifacts against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            artifacts: IndexMap::new(),
            transforms: IndexMap::new(),
            producers: HashMap::new(),
            prefixes: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up an artifact already declared under `name` in the current scope
    pub fn artifact(&self, name: &str) -> Option<Arc<Artifact>> {
        self.artifacts.get(self.qualify(name).as_str()).cloned()
    }

    /// Declare a file artifact
    pub fn file(&mut self, name: &str) -> BeaverResult<Arc<Artifact>> {
        self.declare(name, ArtifactKind::File, None)
    }

    /// Declare a virtual artifact
    pub fn virtual_artifact(&mut self, name: &str) -> BeaverResult<Arc<Artifact>> {
        self.declare(name, ArtifactKind::Virtual, None)
    }

    /// Declare a phony artifact
    pub fn phony(&mut self, name: &str) -> BeaverResult<Arc<Artifact>> {
        self.declare(name, ArtifactKind::Phony, None)
    }

    /// Declare an artifact, returning the existing one on a compatible redeclaration
    ///
    /// Names are qualified by the enclosing groups.
    pub fn declare(
        &mut self,
        name: &str,
        kind: ArtifactKind,
        expected_digest: Option<Digest>,
    ) -> BeaverResult<Arc<Artifact>> {
        let id = ArtifactId::new(self.qualify(name));
        if id.as_str().is_empty() {
            return Err(BeaverError::InvalidTransform(
                "artifact names must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.artifacts.get(&id) {
            let compatible = existing.kind() == kind
                && (expected_digest.is_none() || existing.expected_digest() == expected_digest);
            if !compatible {
                return Err(BeaverError::DuplicateArtifact {
                    name: id.to_string(),
                    existing: existing.to_string(),
                });
            }
            let existing = existing.clone();
            self.note_member(&existing);
            return Ok(existing);
        }

        let mut artifact = match kind {
            ArtifactKind::File => Artifact::file(id.clone(), &self.root),
            ArtifactKind::Virtual => Artifact::virtual_artifact(id.clone()),
            ArtifactKind::Phony => Artifact::phony(id.clone()),
        };
        if let Some(digest) = expected_digest {
            artifact = artifact.with_expected_digest(digest);
        }
        let artifact = Arc::new(artifact);
        self.artifacts.insert(id, artifact.clone());
        self.note_member(&artifact);
        Ok(artifact)
    }

    /// Declare a transformation producing `outputs` from `inputs`
    ///
    /// Every artifact must have been declared through this builder. Fails with
    /// a conflict if an output already has a producer.
    pub fn transform(
        &mut self,
        outputs: &[Arc<Artifact>],
        inputs: &[Arc<Artifact>],
        operation: impl Operation + 'static,
    ) -> BeaverResult<TransformId> {
        self.transform_dyn(outputs, inputs, Arc::new(operation))
    }

    /// Declare a transformation with a shared operation
    pub fn transform_dyn(
        &mut self,
        outputs: &[Arc<Artifact>],
        inputs: &[Arc<Artifact>],
        operation: Arc<dyn Operation>,
    ) -> BeaverResult<TransformId> {
        let outputs = self.registered(outputs)?;
        let inputs = self.registered(inputs)?;

        for (i, output) in outputs.iter().enumerate() {
            if outputs[..i].iter().any(|o| o.identity() == output.identity()) {
                return Err(BeaverError::InvalidTransform(format!(
                    "output {} is declared twice",
                    output.identity()
                )));
            }
            if let Some(existing) = self.producers.get(output.identity()) {
                return Err(BeaverError::Conflict {
                    artifact: output.identity().to_string(),
                    existing: existing.to_string(),
                });
            }
        }

        let transformation = Transformation::new(outputs, inputs, operation)?;
        let id = transformation.id().clone();
        for output in transformation.outputs() {
            self.producers.insert(output.identity().clone(), id.clone());
        }
        self.transforms.insert(id.clone(), Arc::new(transformation));
        Ok(id)
    }

    /// Declare a phony artifact that builds all `members`
    pub fn aggregate(
        &mut self,
        name: &str,
        members: &[Arc<Artifact>],
    ) -> BeaverResult<Arc<Artifact>> {
        let marker = self.phony(name)?;
        self.transform(&[marker.clone()], members, Noop)?;
        Ok(marker)
    }

    /// Declare artifacts and transformations under the `name/` prefix
    ///
    /// The group itself becomes a phony artifact `name` produced by a noop
    /// transformation that consumes every artifact declared inside.
    pub fn group<F>(&mut self, name: &str, declare: F) -> BeaverResult<Arc<Artifact>>
    where
        F: FnOnce(&mut Self) -> BeaverResult<()>,
    {
        self.prefixes.push(name.trim_matches('/').to_string());
        self.members.push(Vec::new());
        let result = declare(self);
        self.prefixes.pop();
        let members = self.members.pop().unwrap_or_default();
        result?;

        self.aggregate(name, &members)
    }

    /// Validate the declarations and freeze them into a graph
    pub fn build(self) -> BeaverResult<BuildGraph> {
        let graph = BuildGraph {
            root: self.root,
            artifacts: self.artifacts,
            transforms: self.transforms,
            producers: self.producers,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn qualify(&self, name: &str) -> String {
        let name = name.trim_start_matches('/');
        if self.prefixes.is_empty() {
            return name.to_string();
        }
        let mut qualified = self.prefixes.join("/");
        qualified.push('/');
        qualified.push_str(name);
        qualified
    }

    fn note_member(&mut self, artifact: &Arc<Artifact>) {
        if let Some(members) = self.members.last_mut() {
            if !members.iter().any(|m| m.identity() == artifact.identity()) {
                members.push(artifact.clone());
            }
        }
    }

    /// Map artifacts onto the instances owned by this builder
    fn registered(&self, artifacts: &[Arc<Artifact>]) -> BeaverResult<Vec<Arc<Artifact>>> {
        artifacts
            .iter()
            .map(|a| {
                self.artifacts
                    .get(a.identity())
                    .cloned()
                    .ok_or_else(|| BeaverError::UnknownArtifact(a.identity().to_string()))
            })
            .collect()
    }
}
