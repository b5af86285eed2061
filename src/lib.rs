//! Beaver - incremental, content-addressed build orchestration
//!
//! Declare artifacts and the transformations between them, then ask for
//! targets: only transformations whose input or output contents changed
//! since their last successful run are executed, in parallel where the
//! dependency graph allows.
//!
//! ```rust,ignore
//! use beaver::graph::GraphBuilder;
//! use beaver::scheduler::{self, BuildOptions};
//! use beaver::store::StalenessStore;
//! use beaver::transform::Command;
//!
//! let mut builder = GraphBuilder::new(root);
//! let a = builder.file("a.txt")?;
//! let b = builder.file("b.txt")?;
//! builder.transform(&[b], &[a], Command::shell("cp $< $@"))?;
//! let graph = builder.build()?;
//!
//! let store = Arc::new(StalenessStore::open(root.join(".beaverdigests")).await);
//! let result = scheduler::build(&graph, store, &["b.txt"], BuildOptions::default()).await?;
//! ```

pub mod artifact;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod event_log;
pub mod graph;
pub mod manifest;
pub mod scheduler;
pub mod store;
pub mod transform;
pub mod ui;

pub use error::{BeaverError, BeaverResult};
