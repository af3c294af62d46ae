//! # cppgrade
//!
//! A batch builder for C/C++ homework submissions. Archives and loose files
//! are normalized into one workspace per student, each workspace is built
//! with CMake, Make or a direct compiler command, and the results are
//! rendered into a report.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Aggregation of build results and unprocessable submissions
pub mod aggregate;
/// Archive detection and extraction
pub mod archive;
/// Build strategy selection and the fallback state machine
pub mod build;
/// Project-shape detection for extracted submissions
pub mod classify;
/// Environment-driven configuration
pub mod config;
/// Error types shared across the crate
pub mod error;
/// Turning raw submissions into student workspaces
pub mod normalize;
/// End-to-end batch orchestration
pub mod pipeline;
/// Spawning external programs and capturing their output
pub mod process;
/// Markdown, CSV and JSON reports
pub mod report;
/// Extension-based routing of loose files
pub mod route;
/// Raw submission entries and identity parsing
pub mod submission;
/// Utility functions for convenience
pub mod util;
/// Per-student output directories
pub mod workspace;

pub use aggregate::{BatchReport, FailureKind, FailureRecord, ResultAggregator};
pub use build::{BuildResult, BuildRunner, BuildStrategy};
pub use config::Config;
pub use pipeline::{CancelToken, Stages};
