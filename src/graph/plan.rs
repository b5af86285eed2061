//! Induced sub-graph for a set of requested targets

use super::BuildGraph;
use crate::artifact::{Artifact, ArtifactId};
use crate::error::{BeaverError, BeaverResult};
use crate::transform::{TransformId, Transformation};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The minimal set of transformations needed to produce some targets
///
/// Transformations are held in topological order: by layer, then by
/// declaration order within a layer. Indices into that order identify
/// transformations in every accessor.
#[derive(Debug)]
pub struct Plan {
    targets: Vec<ArtifactId>,
    order: Vec<Arc<Transformation>>,
    index: HashMap<TransformId, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    layers: Vec<Vec<usize>>,
    producers: HashMap<ArtifactId, usize>,
    sources: Vec<Arc<Artifact>>,
}

impl Plan {
    pub(super) fn resolve<S: AsRef<str>>(graph: &BuildGraph, targets: &[S]) -> BeaverResult<Self> {
        let mut target_ids = Vec::with_capacity(targets.len());
        let mut pending: Vec<TransformId> = Vec::new();

        for target in targets {
            let name = target.as_ref();
            let artifact = graph
                .artifact(name)
                .ok_or_else(|| BeaverError::UnknownArtifact(name.to_string()))?;
            match graph.producer(name) {
                Some(producer) => pending.push(producer.id().clone()),
                None if artifact.exists()? => {}
                None => return Err(BeaverError::UnknownArtifact(name.to_string())),
            }
            target_ids.push(artifact.identity().clone());
        }

        // Collect the induced sub-graph
        let mut needed: HashSet<TransformId> = HashSet::new();
        while let Some(id) = pending.pop() {
            if !needed.insert(id.clone()) {
                continue;
            }
            if let Some(transform) = graph.transformation(&id) {
                pending.extend(graph.dependencies(transform));
            }
        }

        // Layer = longest dependency chain below the transformation
        let mut declared: Vec<&Arc<Transformation>> = graph
            .transformations()
            .filter(|t| needed.contains(t.id()))
            .collect();
        let mut level: HashMap<TransformId, usize> = HashMap::new();
        let mut remaining = declared.clone();
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|t| {
                let deps = graph.dependencies(t);
                let mut depth = 0;
                for dep in &deps {
                    match graph.transformation(dep).and_then(|d| level.get(d.id())) {
                        Some(l) => depth = depth.max(l + 1),
                        None => return true,
                    }
                }
                level.insert(t.id().clone(), depth);
                false
            });
            if remaining.len() == before {
                return Err(BeaverError::Internal(
                    "plan contains a dependency cycle".to_string(),
                ));
            }
        }
        // Stable sort keeps declaration order within a layer
        declared.sort_by_key(|t| level.get(t.id()).copied().unwrap_or_default());

        let order: Vec<Arc<Transformation>> = declared.into_iter().cloned().collect();
        let index: HashMap<TransformId, usize> = order
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id().clone(), i))
            .collect();

        let mut dependencies = vec![Vec::new(); order.len()];
        let mut dependents = vec![Vec::new(); order.len()];
        let mut layers: Vec<Vec<usize>> = Vec::new();
        let mut producers = HashMap::new();
        let mut sources: Vec<Arc<Artifact>> = Vec::new();

        for (i, transform) in order.iter().enumerate() {
            for dep in graph.dependencies(transform) {
                if let Some(&d) = index.get(&dep) {
                    dependencies[i].push(d);
                    dependents[d].push(i);
                }
            }
            let layer = level.get(transform.id()).copied().unwrap_or_default();
            if layers.len() <= layer {
                layers.resize_with(layer + 1, Vec::new);
            }
            layers[layer].push(i);

            for output in transform.outputs() {
                producers.insert(output.identity().clone(), i);
            }
            for input in transform.inputs() {
                let is_source = graph.producer(input.identity().as_str()).is_none();
                if is_source && !sources.iter().any(|s| s.identity() == input.identity()) {
                    sources.push(input.clone());
                }
            }
        }

        Ok(Self {
            targets: target_ids,
            order,
            index,
            dependencies,
            dependents,
            layers,
            producers,
            sources,
        })
    }

    /// Requested target artifacts
    pub fn targets(&self) -> &[ArtifactId] {
        &self.targets
    }

    /// Transformations in topological order
    pub fn transformations(&self) -> &[Arc<Transformation>] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of a transformation in the plan
    pub fn position(&self, id: &TransformId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Plan positions of the transformations producing inputs of `i`
    pub fn dependencies(&self, i: usize) -> &[usize] {
        &self.dependencies[i]
    }

    /// Plan positions of the transformations consuming outputs of `i`
    pub fn dependents(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }

    /// Every transformation transitively depending on `i`, in plan order
    pub fn descendants(&self, i: usize) -> Vec<usize> {
        let mut seen = vec![false; self.order.len()];
        let mut stack = self.dependents[i].clone();
        while let Some(next) = stack.pop() {
            if !std::mem::replace(&mut seen[next], true) {
                stack.extend_from_slice(&self.dependents[next]);
            }
        }
        (0..self.order.len()).filter(|&j| seen[j]).collect()
    }

    /// Groups of transformations with no dependency among them
    pub fn layers(&self) -> Vec<Vec<&TransformId>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&i| self.order[i].id()).collect())
            .collect()
    }

    /// Transformation in this plan producing the artifact
    pub fn producer(&self, artifact: &str) -> Option<&Arc<Transformation>> {
        self.producers.get(artifact).map(|&i| &self.order[i])
    }

    /// Input artifacts of the plan with no producer
    pub fn sources(&self) -> &[Arc<Artifact>] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::transform::Noop;
    use tempfile::TempDir;

    /// a -> b -> c and an independent d -> e, plus all = {c, e}
    fn diamond(dir: &TempDir) -> BuildGraph {
        std::fs::write(dir.path().join("a"), "a").unwrap();
        std::fs::write(dir.path().join("d"), "d").unwrap();
        let mut builder = GraphBuilder::new(dir.path());
        let a = builder.file("a").unwrap();
        let b = builder.file("b").unwrap();
        let c = builder.file("c").unwrap();
        let d = builder.file("d").unwrap();
        let e = builder.file("e").unwrap();
        builder.transform(&[b.clone()], &[a], Noop).unwrap();
        builder.transform(&[c.clone()], &[b], Noop).unwrap();
        builder.transform(&[e.clone()], &[d], Noop).unwrap();
        builder.aggregate("all", &[c, e]).unwrap();
        builder.build().unwrap()
    }

    fn names(ids: Vec<&TransformId>) -> Vec<&str> {
        ids.into_iter().map(TransformId::as_str).collect()
    }

    #[test]
    fn resolves_minimal_subgraph() {
        let dir = TempDir::new().unwrap();
        let graph = diamond(&dir);

        let plan = graph.resolve(&["c"]).unwrap();
        let order: Vec<_> = plan.transformations().iter().map(|t| t.id().as_str()).collect();
        assert_eq!(order, vec!["b", "c"]);
        assert_eq!(plan.sources().len(), 1);
        assert_eq!(plan.sources()[0].identity().as_str(), "a");
    }

    #[test]
    fn layers_group_independent_work() {
        let dir = TempDir::new().unwrap();
        let graph = diamond(&dir);

        let plan = graph.resolve(&["all"]).unwrap();
        let layers: Vec<Vec<&str>> = plan.layers().into_iter().map(names).collect();
        assert_eq!(layers, vec![vec!["b", "e"], vec!["c"], vec!["all"]]);

        let b = plan.position(&plan.producer("b").unwrap().id().clone()).unwrap();
        let descendants: Vec<_> = plan
            .descendants(b)
            .into_iter()
            .map(|i| plan.transformations()[i].id().as_str())
            .collect();
        assert_eq!(descendants, vec!["c", "all"]);
    }

    #[test]
    fn existing_source_target_needs_no_work() {
        let dir = TempDir::new().unwrap();
        let graph = diamond(&dir);
        let plan = graph.resolve(&["a"]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.targets()[0].as_str(), "a");
    }

    #[test]
    fn unknown_targets_rejected() {
        let dir = TempDir::new().unwrap();
        let mut builder = GraphBuilder::new(dir.path());
        builder.file("missing-source").unwrap();
        let graph = builder.build().unwrap();

        assert!(matches!(
            graph.resolve(&["undeclared"]),
            Err(BeaverError::UnknownArtifact(_))
        ));
        assert!(matches!(
            graph.resolve(&["missing-source"]),
            Err(BeaverError::UnknownArtifact(_))
        ));
    }
}
