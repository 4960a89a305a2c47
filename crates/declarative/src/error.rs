//! Error types for catalog construction and execution
//!
//! Only structural problems (duplicate references, dependency cycles,
//! dangling relationships) and persistence I/O surface as errors. Failures
//! of individual resources are recorded on their status instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or running a catalog
#[derive(Error, Debug)]
pub enum Error {
    /// A different resource is already registered under this reference
    #[error("duplicate declaration: {reference} is already declared")]
    DuplicateResource {
        /// The conflicting reference, rendered as `Type[title]`
        reference: String,
    },

    /// An alias would shadow another resource
    #[error("cannot alias {reference} to {alias}; resource {alias} already exists")]
    AliasConflict {
        /// The resource being aliased
        reference: String,
        /// The alias that is already taken
        alias: String,
    },

    /// A lookup by reference found nothing
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// A declared relationship points at a resource that is not in the catalog
    #[error("could not find {kind} target {target} for {source_ref}")]
    UnknownRelationshipTarget {
        /// Resource declaring the relationship
        source_ref: String,
        /// Relationship kind (`before`, `require`, `notify`, `subscribe`)
        kind: String,
        /// Missing target reference
        target: String,
    },

    /// The relationship graph is not a DAG
    #[error("found {}: {}", cycle_count(.cycles), format_cycles(.cycles))]
    DependencyCycle {
        /// Each cycle as the list of references taking part in it
        cycles: Vec<Vec<String>>,
    },

    /// At least one resource refused to run; the messages are `Type[title]: reason`
    #[error("Some pre-run checks failed: {}", .0.join("; "))]
    PreRunChecksFailed(Vec<String>),

    /// `eval_generate` was requested on a depth-first resource
    #[error("depth-first resources are not supported by eval_generate: {0}")]
    NestedEvalGenerate(String),

    /// The persistence store could not be read or written
    #[error("state store {}: {source}", .path.display())]
    Store {
        /// Store file location
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error was raised before any resource was visited
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateResource { .. }
                | Self::AliasConflict { .. }
                | Self::UnknownRelationshipTarget { .. }
                | Self::DependencyCycle { .. }
                | Self::PreRunChecksFailed(_)
        )
    }
}

fn cycle_count(cycles: &[Vec<String>]) -> String {
    match cycles.len() {
        1 => "1 dependency cycle".to_string(),
        n => format!("{n} dependency cycles"),
    }
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            let mut path = cycle.clone();
            if let Some(first) = cycle.first() {
                path.push(first.clone());
            }
            format!("({})", path.join(" => "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, Error>;
