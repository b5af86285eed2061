//! Build graph: artifacts, transformations and the edges between them
//!
//! The graph is bipartite: transformations consume and produce artifacts.
//! Edges between transformations are implied by producer lookup on their
//! input artifacts. A [`BuildGraph`] is immutable and always acyclic; it is
//! obtained from a [`GraphBuilder`] and resolved into a [`Plan`] per build.

pub mod builder;
pub mod plan;

pub use builder::GraphBuilder;
pub use plan::Plan;

use crate::artifact::{Artifact, ArtifactId};
use crate::error::{BeaverError, BeaverResult};
use crate::transform::{TransformId, Transformation};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A validated, acyclic set of declarations
#[derive(Debug)]
pub struct BuildGraph {
    root: PathBuf,
    artifacts: IndexMap<ArtifactId, Arc<Artifact>>,
    transforms: IndexMap<TransformId, Arc<Transformation>>,
    producers: HashMap<ArtifactId, TransformId>,
}

impl BuildGraph {
    /// Build root file artifacts are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up an artifact by identity
    pub fn artifact(&self, id: &str) -> Option<&Arc<Artifact>> {
        self.artifacts.get(id)
    }

    /// All artifacts in declaration order
    pub fn artifacts(&self) -> impl Iterator<Item = &Arc<Artifact>> {
        self.artifacts.values()
    }

    /// All transformations in declaration order
    pub fn transformations(&self) -> impl Iterator<Item = &Arc<Transformation>> {
        self.transforms.values()
    }

    pub fn transformation(&self, id: &TransformId) -> Option<&Arc<Transformation>> {
        self.transforms.get(id)
    }

    /// Transformation producing the given artifact, if any
    pub fn producer(&self, artifact: &str) -> Option<&Arc<Transformation>> {
        self.producers
            .get(artifact)
            .and_then(|id| self.transforms.get(id))
    }

    /// Producers of a transformation's inputs, deduplicated, in input order
    pub fn dependencies(&self, transform: &Transformation) -> Vec<TransformId> {
        let mut deps: Vec<TransformId> = Vec::new();
        for input in transform.inputs() {
            if let Some(id) = self.producers.get(input.identity()) {
                if !deps.contains(id) {
                    deps.push(id.clone());
                }
            }
        }
        deps
    }

    /// Artifacts whose identity matches any of the patterns
    ///
    /// Patterns are regular expressions anchored at the start of the
    /// identity. Results keep declaration order.
    pub fn match_artifacts<S: AsRef<str>>(&self, patterns: &[S]) -> BeaverResult<Vec<Arc<Artifact>>> {
        let regexes = patterns
            .iter()
            .map(|p| {
                let pattern = p.as_ref();
                Regex::new(&format!("^(?:{pattern})")).map_err(|e| BeaverError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<BeaverResult<Vec<_>>>()?;

        Ok(self
            .artifacts
            .values()
            .filter(|a| regexes.iter().any(|r| r.is_match(a.identity().as_str())))
            .cloned()
            .collect())
    }

    /// Expand command-line targets into artifact identities
    ///
    /// A declared name selects itself; anything else is a pattern that must
    /// match at least one artifact.
    pub fn select<S: AsRef<str>>(&self, targets: &[S]) -> BeaverResult<Vec<ArtifactId>> {
        let mut selected: Vec<ArtifactId> = Vec::new();
        for target in targets {
            let target = target.as_ref();
            let matched = match self.artifacts.get(target) {
                Some(artifact) => vec![artifact.clone()],
                None => self.match_artifacts(&[target])?,
            };
            if matched.is_empty() {
                return Err(BeaverError::UnknownArtifact(target.to_string()));
            }
            for artifact in matched {
                if !selected.contains(artifact.identity()) {
                    selected.push(artifact.identity().clone());
                }
            }
        }
        Ok(selected)
    }

    /// Resolve the minimal plan producing `targets`
    pub fn resolve<S: AsRef<str>>(&self, targets: &[S]) -> BeaverResult<Plan> {
        Plan::resolve(self, targets)
    }

    /// Reject any transformation transitively consuming its own output
    pub(crate) fn check_acyclic(&self) -> BeaverResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&TransformId, Mark> = HashMap::new();

        for start in self.transforms.keys() {
            if marks.contains_key(start) {
                continue;
            }
            // Iterative DFS: (transformation, index of next dependency)
            let mut stack: Vec<(&TransformId, Vec<TransformId>, usize)> = Vec::new();
            let deps = self.dependencies(&self.transforms[start]);
            marks.insert(start, Mark::Visiting);
            stack.push((start, deps, 0));

            while let Some((current, deps, next)) = stack.last_mut() {
                let Some(dep) = deps.get(*next).cloned() else {
                    marks.insert(*current, Mark::Done);
                    stack.pop();
                    continue;
                };
                *next += 1;

                let Some((dep_key, dep_transform)) = self.transforms.get_key_value(&dep) else {
                    continue;
                };
                match marks.get(dep_key).copied() {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        let mut path: Vec<String> = stack
                            .iter()
                            .skip_while(|(id, _, _)| *id != dep_key)
                            .map(|(id, _, _)| id.to_string())
                            .collect();
                        path.push(dep_key.to_string());
                        return Err(BeaverError::Cycle { path });
                    }
                    None => {
                        marks.insert(dep_key, Mark::Visiting);
                        let deps = self.dependencies(dep_transform);
                        stack.push((dep_key, deps, 0));
                    }
                }
            }
        }
        Ok(())
    }
}
