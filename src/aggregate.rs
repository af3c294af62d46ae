#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::build::BuildResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Category of an unprocessable submission.
pub enum FailureKind {
    /// The archive could not be read or decoded.
    Extraction,
    /// The workspace for a student could not be created or populated.
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A submission item that could not be processed, with the reason why.
pub struct FailureRecord {
    /// The archive (or entry) that failed.
    pub source:      PathBuf,
    /// What went wrong, broadly.
    pub kind:        FailureKind,
    /// Human readable description of the error.
    pub description: String,
}

impl FailureRecord {
    /// Creates a failure record for `source`.
    pub fn new(source: &Path, kind: FailureKind, description: impl Into<String>) -> Self {
        Self {
            source: source.to_path_buf(),
            kind,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Everything the reporting side consumes: build results keyed (and
/// therefore ordered) by identity, and failures ordered by source path.
pub struct BatchReport {
    /// identity -> build result
    pub builds:   BTreeMap<String, BuildResult>,
    /// unprocessable submissions
    pub failures: Vec<FailureRecord>,
}

impl BatchReport {
    /// Number of builds that finished with status 0.
    pub fn successes(&self) -> usize {
        self.builds.values().filter(|r| r.succeeded()).count()
    }
}

#[derive(Debug, Default)]
/// Collects results from both passes of a run. Safe to share between build
/// workers.
pub struct ResultAggregator {
    /// identity -> latest build result
    builds:   Mutex<BTreeMap<String, BuildResult>>,
    /// failures in arrival order
    failures: Mutex<Vec<FailureRecord>>,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the build result of `identity`, replacing any earlier one.
    pub fn record_build(&self, identity: impl Into<String>, result: BuildResult) {
        self.builds
            .lock()
            .expect("build results poisoned")
            .insert(identity.into(), result);
    }

    /// Appends a failure record.
    pub fn record_failure(&self, failure: FailureRecord) {
        self.failures
            .lock()
            .expect("failure list poisoned")
            .push(failure);
    }

    /// Appends several failure records.
    pub fn record_failures(&self, failures: impl IntoIterator<Item = FailureRecord>) {
        self.failures
            .lock()
            .expect("failure list poisoned")
            .extend(failures);
    }

    /// Returns a sorted copy of everything collected so far.
    pub fn snapshot(&self) -> BatchReport {
        let builds = self.builds.lock().expect("build results poisoned").clone();
        let mut failures = self.failures.lock().expect("failure list poisoned").clone();
        failures.sort_by(|a, b| a.source.cmp(&b.source));

        BatchReport { builds, failures }
    }

    /// Consumes the aggregator and returns the sorted report.
    pub fn into_report(self) -> BatchReport {
        let builds = self.builds.into_inner().expect("build results poisoned");
        let mut failures = self.failures.into_inner().expect("failure list poisoned");
        failures.sort_by(|a, b| a.source.cmp(&b.source));

        BatchReport { builds, failures }
    }
}
