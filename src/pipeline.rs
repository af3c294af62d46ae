#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Runs a batch end to end: normalize every submission, then build every
//! workspace.

use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, bail};
use futures::{StreamExt, stream};
use itertools::Itertools;

use crate::{
    aggregate::{BatchReport, ResultAggregator},
    archive::ArchiveExpander,
    build::{BuildRunner, ProcessExecutor, StepExecutor},
    classify::visible_entries,
    config::Config,
    normalize::SubmissionNormalizer,
};

#[derive(Debug, Clone, Default)]
/// Shared flag asking a running batch to stop before the next submission.
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Steps already running are left to finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which passes of a run are enabled.
pub struct Stages {
    /// expand archives and populate workspaces
    pub normalize: bool,
    /// build every workspace in the output directory
    pub build:     bool,
    /// write the report files
    pub report:    bool,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            normalize: true,
            build:     true,
            report:    true,
        }
    }
}

impl FromStr for Stages {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut stages = Stages {
            normalize: false,
            build:     false,
            report:    false,
        };

        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "normalize" => stages.normalize = true,
                "build" => stages.build = true,
                "report" => stages.report = true,
                other => bail!("Unknown stage `{other}`, expected normalize, build or report"),
            }
        }

        if !(stages.normalize || stages.build || stages.report) {
            bail!("At least one stage is required");
        }
        Ok(stages)
    }
}

impl Display for Stages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.normalize, "normalize"),
            (self.build, "build"),
            (self.report, "report"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .join(",");
        write!(f, "{names}")
    }
}

/// Lists the workspaces currently in `output_dir` as `(identity, root)`
/// pairs, sorted by identity.
pub fn list_workspaces(output_dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    Ok(visible_entries(output_dir)?
        .into_iter()
        .filter(|e| e.is_dir)
        .map(|e| (e.name, e.path))
        .collect())
}

/// Builds every workspace, at most `jobs` at a time, recording results into
/// `aggregator`.
///
/// Workspaces not yet started when `cancel` trips are skipped and produce no
/// result.
pub async fn build_all<E>(
    runner: &BuildRunner<E>,
    workspaces: Vec<(String, PathBuf)>,
    jobs: usize,
    cancel: &CancelToken,
    aggregator: &ResultAggregator,
) where
    E: StepExecutor,
{
    stream::iter(workspaces)
        .map(|(identity, root)| async move {
            if cancel.is_cancelled() {
                tracing::debug!("Cancelled, not building {identity}");
                return;
            }

            tracing::info!("Building {identity}");
            let result = runner.build(&root).await;
            if !result.succeeded() {
                tracing::warn!("{identity} failed to build (status {})", result.exit_code);
            }
            aggregator.record_build(identity, result);
        })
        .buffer_unordered(jobs.max(1))
        .collect::<Vec<()>>()
        .await;
}

/// Runs the enabled normalize and build passes described by `config`.
///
/// Per-submission problems end up in the returned report; only global
/// faults (unreadable submission directory, output directory that cannot be
/// created or listed) are errors.
pub async fn run(config: &Config, stages: Stages, cancel: &CancelToken) -> Result<BatchReport> {
    let aggregator = ResultAggregator::new();

    if stages.normalize {
        let normalizer = SubmissionNormalizer::new(
            ArchiveExpander::new(&config.unrar),
            config.keep_output,
            config.keep_file_structure,
        )
        .with_cancel(cancel.clone());

        let normalized = normalizer
            .normalize(&config.submission_dir, &config.output_dir)
            .context("Normalization failed")?;
        tracing::info!(
            "Normalized {} submissions ({} failures)",
            normalized.workspaces.len(),
            normalized.failures.len()
        );
        aggregator.record_failures(normalized.failures);
    }

    if stages.build && !cancel.is_cancelled() {
        let workspaces = list_workspaces(&config.output_dir)
            .with_context(|| format!("Could not list {}", config.output_dir.display()))?;
        let runner = BuildRunner::new(config.toolchain(), ProcessExecutor::new(config.step_timeout()));

        build_all(&runner, workspaces, config.jobs, cancel, &aggregator).await;
    }

    Ok(aggregator.into_report())
}
