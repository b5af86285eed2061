//! List command - show declared artifacts

use super::Project;
use crate::artifact::{Artifact, ArtifactKind};
use crate::cli::args::{ListArgs, OutputFormat};
use crate::error::BeaverResult;
use crate::graph::BuildGraph;
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;
use std::sync::Arc;

/// One row of the listing
#[derive(Debug, Serialize)]
struct ArtifactEntry {
    name: String,
    kind: ArtifactKind,
    /// Identity of the producing transformation; `None` for sources
    producer: Option<String>,
    operation: Option<&'static str>,
}

/// Execute the list command
pub async fn execute(args: ListArgs, project: &Project) -> BeaverResult<()> {
    let (_, graph) = project.load(args.file.as_deref()).await?;

    let artifacts: Vec<Arc<Artifact>> = if args.patterns.is_empty() {
        graph.artifacts().cloned().collect()
    } else {
        graph.match_artifacts(&args.patterns)?
    };
    let entries = entries(&graph, &artifacts);

    if entries.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No matching artifacts");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => entries.iter().for_each(|e| println!("{}", e.name)),
    }

    Ok(())
}

fn entries(graph: &BuildGraph, artifacts: &[Arc<Artifact>]) -> Vec<ArtifactEntry> {
    artifacts
        .iter()
        .map(|artifact| {
            let producer = graph.producer(artifact.identity().as_str());
            ArtifactEntry {
                name: artifact.identity().to_string(),
                kind: artifact.kind(),
                producer: producer.map(|t| t.id().to_string()),
                operation: producer.map(|t| t.operation().kind()),
            }
        })
        .collect()
}

fn print_table(entries: &[ArtifactEntry]) {
    let width = entries
        .iter()
        .map(|e| e.name.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(4, 48);

    println!(
        "{:<width$}  {:<8}  {}",
        style("NAME").bold(),
        style("KIND").bold(),
        style("PRODUCER").bold(),
        width = width
    );
    println!("{}", "-".repeat(width + 30));

    for entry in entries {
        let kind = match entry.kind {
            ArtifactKind::File => style("file").cyan(),
            ArtifactKind::Virtual => style("virtual").magenta(),
            ArtifactKind::Phony => style("phony").yellow(),
        };
        let producer = match (&entry.producer, entry.operation) {
            (Some(id), Some(operation)) => format!("{} [{}]", operation, id),
            _ => style("source").dim().to_string(),
        };
        println!("{:<width$}  {:<8}  {}", entry.name, kind, producer, width = width);
    }

    println!();
    println!("{} artifact(s)", entries.len());
}
