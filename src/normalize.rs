#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Turns a directory of raw submissions into one canonical workspace per
//! student.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::{
    aggregate::{FailureKind, FailureRecord},
    archive::{ArchiveExpander, ArchiveKind},
    classify::{classify_root, visible_entries},
    error::WorkspaceError,
    pipeline::CancelToken,
    route::FileDestination,
    submission::{SubmissionEntry, is_hidden},
    util::{copy_file, copy_tree},
    workspace::{Preparation, StudentWorkspace},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// How a student's submission was laid into the workspace.
pub enum Layout {
    /// A project tree (or, with keep-file-structure, any archive tree) was
    /// copied as-is.
    Structured,
    /// Files were re-routed into `src/`, `include/` and the root by extension.
    Unstructured,
    /// The workspace already existed and keep-output was requested.
    Kept,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Per-student outcome of normalization.
pub struct WorkspaceResult {
    /// the workspace that was populated
    pub workspace: StudentWorkspace,
    /// structured / unstructured / kept
    pub layout:    Layout,
    /// number of files written into the workspace
    pub placed:    usize,
    /// number of files skipped because of their extension
    pub ignored:   usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Result of normalizing a whole submission directory.
pub struct NormalizeReport {
    /// identity -> workspace outcome
    pub workspaces: BTreeMap<String, WorkspaceResult>,
    /// archives that could not be expanded and identities whose workspace
    /// could not be built
    pub failures:   Vec<FailureRecord>,
}

#[derive(Debug, Clone, Default)]
/// Expands, groups, classifies and copies submissions.
pub struct SubmissionNormalizer {
    /// extracts archives before grouping
    expander:            ArchiveExpander,
    /// leave existing workspaces untouched
    keep_output:         bool,
    /// copy directory submissions as-is even without a descriptor
    keep_file_structure: bool,
    /// checked between students
    cancel:              Option<CancelToken>,
}

impl SubmissionNormalizer {
    /// Creates a normalizer.
    pub fn new(expander: ArchiveExpander, keep_output: bool, keep_file_structure: bool) -> Self {
        Self {
            expander,
            keep_output,
            keep_file_structure,
            cancel: None,
        }
    }

    /// Stops processing further students once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Normalizes every submission in `submission_dir` into `output_dir`.
    ///
    /// Only a missing/unreadable submission directory or an output directory
    /// that cannot be created is an error. Everything that goes wrong for a
    /// single archive or student ends up in [`NormalizeReport::failures`].
    pub fn normalize(&self, submission_dir: &Path, output_dir: &Path) -> Result<NormalizeReport> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Could not create output directory {}", output_dir.display()))?;

        let (_, mut failures) = self
            .expander
            .expand_all(submission_dir)
            .with_context(|| format!("Could not list {}", submission_dir.display()))?;

        let mapping = map_submissions(submission_dir, output_dir)
            .with_context(|| format!("Could not list {}", submission_dir.display()))?;

        if !self.keep_output {
            failures.extend(prune_stale_workspaces(output_dir, submission_dir, &mapping)?);
        }

        let mut workspaces = BTreeMap::new();
        for (identity, entries) in mapping {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                tracing::warn!("Cancelled, skipping remaining submissions");
                break;
            }

            tracing::info!("Processing {identity}");
            match self.normalize_identity(output_dir, &identity, &entries) {
                Ok(result) => {
                    workspaces.insert(identity, result);
                }
                Err(e) => {
                    tracing::warn!("Could not prepare workspace for {identity}: {e}");
                    failures.push(FailureRecord::new(
                        &output_dir.join(&identity),
                        FailureKind::Filesystem,
                        e.to_string(),
                    ));
                }
            }
        }

        Ok(NormalizeReport {
            workspaces,
            failures,
        })
    }

    /// Creates and fills the workspace of one student.
    fn normalize_identity(
        &self,
        output_dir: &Path,
        identity: &str,
        entries: &[SubmissionEntry],
    ) -> Result<WorkspaceResult, WorkspaceError> {
        let workspace = StudentWorkspace::new(output_dir, identity)?;

        if workspace.prepare(self.keep_output)? == Preparation::Kept {
            tracing::info!("Keeping {}", workspace.root().display());
            return Ok(WorkspaceResult {
                workspace,
                layout: Layout::Kept,
                placed: 0,
                ignored: 0,
            });
        }

        let mut result = WorkspaceResult {
            workspace,
            layout: Layout::Unstructured,
            placed: 0,
            ignored: 0,
        };

        for entry in entries {
            if entry.path().is_dir() {
                self.place_directory(entry.path(), &mut result)?;
            } else {
                let name = entry.stripped_name().unwrap_or_default();
                place_file(entry.path(), &name, &mut result)?;
            }
        }

        Ok(result)
    }

    /// Copies a directory submission wholesale or re-routes its files.
    fn place_directory(&self, dir: &Path, result: &mut WorkspaceResult) -> Result<(), WorkspaceError> {
        let (verdict, root) = classify_root(dir).map_err(|source| WorkspaceError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        if verdict.has_descriptor || self.keep_file_structure {
            result.placed += copy_tree(&root, result.workspace.root())?;
            result.layout = Layout::Structured;
            return Ok(());
        }

        tracing::debug!("{} has no build descriptor, routing files by extension", dir.display());
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(&e.file_name().to_string_lossy()));

        for entry in walker {
            let entry = entry.map_err(|e| WorkspaceError::Read {
                path:   e.path().unwrap_or(dir).to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            place_file(entry.path(), &name, result)?;
        }

        Ok(())
    }
}

/// Copies one loose file to the folder its extension maps to, under
/// `file_name`.
fn place_file(path: &Path, file_name: &str, result: &mut WorkspaceResult) -> Result<(), WorkspaceError> {
    let destination = FileDestination::for_path(path);
    match destination.directory_in(&result.workspace) {
        Some(dir) if !file_name.is_empty() => {
            copy_file(path, &dir.join(file_name))?;
            result.placed += 1;
        }
        _ => {
            tracing::debug!("Ignoring {}", path.display());
            result.ignored += 1;
        }
    }
    Ok(())
}

/// Groups the non-archive top-level entries of `submission_dir` by identity.
///
/// Archives themselves are skipped; their expanded working directories are
/// picked up like any other folder.
pub fn map_submissions(
    submission_dir: &Path,
    output_dir: &Path,
) -> std::io::Result<BTreeMap<String, Vec<SubmissionEntry>>> {
    let output_dir = output_dir.canonicalize().unwrap_or_else(|_| output_dir.to_path_buf());
    let mut mapping: BTreeMap<String, Vec<SubmissionEntry>> = BTreeMap::new();

    for listed in visible_entries(submission_dir)? {
        if listed.is_dir && same_path(&listed.path, &output_dir) {
            continue;
        }
        if !listed.is_dir && is_archive_like(&listed.path) {
            continue;
        }
        if let Some(entry) = SubmissionEntry::new(listed.path, false) {
            mapping
                .entry(entry.identity().to_string())
                .or_default()
                .push(entry);
        }
    }

    Ok(mapping)
}

/// Removes workspace folders in `output_dir` that belong to no identity of
/// this batch. A folder holding the submission directory is never touched.
///
/// Returns one failure per folder that could not be removed; an unreadable
/// output directory is an error.
pub fn prune_stale_workspaces(
    output_dir: &Path,
    submission_dir: &Path,
    mapping: &BTreeMap<String, Vec<SubmissionEntry>>,
) -> Result<Vec<FailureRecord>> {
    let submission_dir = submission_dir
        .canonicalize()
        .unwrap_or_else(|_| submission_dir.to_path_buf());
    let mut failures = Vec::new();

    let listing = visible_entries(output_dir)
        .with_context(|| format!("Could not list {}", output_dir.display()))?;
    for listed in listing {
        if !listed.is_dir || mapping.contains_key(&listed.name) {
            continue;
        }
        if listed
            .path
            .canonicalize()
            .is_ok_and(|p| submission_dir.starts_with(p))
        {
            continue;
        }

        tracing::info!("Removing stale workspace {}", listed.path.display());
        if let Err(source) = fs::remove_dir_all(&listed.path) {
            let err = WorkspaceError::Remove {
                path: listed.path.clone(),
                source,
            };
            tracing::warn!("{err}");
            failures.push(FailureRecord::new(&listed.path, FailureKind::Filesystem, err.to_string()));
        }
    }

    Ok(failures)
}

/// True for files that are, or claim to be, archives.
fn is_archive_like(path: &Path) -> bool {
    ArchiveKind::claimed_by_extension(path) || matches!(ArchiveKind::sniff(path), Ok(Some(_)))
}

/// Compares a path against an already canonical one.
fn same_path(path: &Path, canonical: &Path) -> bool {
    path.canonicalize().is_ok_and(|p| p == canonical)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::*;

    fn temp_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!("cppgrade-normalize-{}", Uuid::new_v4()));
        fs::create_dir_all(&root).expect("create temp root");
        root
    }

    #[test]
    fn mapping_groups_by_identity_and_skips_archives() {
        let root = temp_root();
        let subs = root.join("subs");
        fs::create_dir_all(subs.join("alice_1_2_hw")).unwrap();
        fs::write(subs.join("alice_1_2_main.cpp"), "").unwrap();
        fs::write(subs.join("bob_1_2_hw.zip"), "not really").unwrap();
        fs::write(subs.join(".DS_Store"), "").unwrap();

        let mapping = map_submissions(&subs, &root.join("out")).unwrap();

        assert_eq!(mapping.keys().collect::<Vec<_>>(), ["alice"]);
        assert_eq!(mapping["alice"].len(), 2);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn output_inside_submission_dir_is_not_a_submission() {
        let root = temp_root();
        fs::create_dir_all(root.join("output")).unwrap();
        fs::write(root.join("zed_1_2_a.cpp"), "").unwrap();

        let mapping = map_submissions(&root, &root.join("output")).unwrap();
        assert_eq!(mapping.keys().collect::<Vec<_>>(), ["zed"]);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unstructured_folder_is_routed_by_extension() {
        let root = temp_root();
        let subs = root.join("subs");
        let out = root.join("out");
        let hw = subs.join("dan_1_2_hw");
        fs::create_dir_all(hw.join("deep/__MACOSX")).unwrap();
        fs::write(hw.join("deep/main.cpp"), "").unwrap();
        fs::write(hw.join("list.h"), "").unwrap();
        fs::write(hw.join("README.md"), "").unwrap();
        fs::write(hw.join("photo.png"), "").unwrap();
        fs::write(hw.join("deep/__MACOSX/._main.cpp"), "").unwrap();

        let report = SubmissionNormalizer::default().normalize(&subs, &out).unwrap();

        let dan = &report.workspaces["dan"];
        assert_eq!(dan.layout, Layout::Unstructured);
        assert_eq!(dan.placed, 3);
        assert_eq!(dan.ignored, 1);
        assert!(out.join("dan/src/main.cpp").is_file());
        assert!(out.join("dan/include/list.h").is_file());
        assert!(out.join("dan/README.md").is_file());
        assert!(!out.join("dan/photo.png").exists());
        assert!(!out.join("dan/src/._main.cpp").exists());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn keep_file_structure_copies_without_descriptor() {
        let root = temp_root();
        let subs = root.join("subs");
        let out = root.join("out");
        fs::create_dir_all(subs.join("eve_1_2_hw/wrapper/lib")).unwrap();
        fs::write(subs.join("eve_1_2_hw/wrapper/lib/x.cpp"), "").unwrap();
        fs::write(subs.join("eve_1_2_hw/wrapper/data.csv"), "").unwrap();

        let report = SubmissionNormalizer::new(ArchiveExpander::default(), false, true)
            .normalize(&subs, &out)
            .unwrap();

        assert_eq!(report.workspaces["eve"].layout, Layout::Structured);
        assert!(out.join("eve/lib/x.cpp").is_file());
        assert!(out.join("eve/data.csv").is_file());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn cancelled_normalizer_creates_nothing() {
        let root = temp_root();
        let subs = root.join("subs");
        fs::create_dir_all(&subs).unwrap();
        fs::write(subs.join("fay_1_2_a.cpp"), "").unwrap();

        let token = CancelToken::new();
        token.cancel();
        let report = SubmissionNormalizer::default()
            .with_cancel(token)
            .normalize(&subs, &root.join("out"))
            .unwrap();

        assert!(report.workspaces.is_empty());
        assert!(!root.join("out/fay").exists());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_submission_dir_is_a_global_error() {
        let root = temp_root();
        let result = SubmissionNormalizer::default().normalize(&root.join("nope"), &root.join("out"));
        assert!(result.is_err());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn stale_workspaces_are_pruned_unless_kept() {
        let root = temp_root();
        let subs = root.join("subs");
        let out = root.join("out");
        fs::create_dir_all(out.join("ghost/src")).unwrap();
        fs::create_dir_all(&subs).unwrap();
        fs::write(subs.join("alice_1_2_main.cpp"), "").unwrap();

        SubmissionNormalizer::new(ArchiveExpander::default(), true, false)
            .normalize(&subs, &out)
            .unwrap();
        assert!(out.join("ghost").is_dir());

        let report = SubmissionNormalizer::default().normalize(&subs, &out).unwrap();
        assert!(report.failures.is_empty());
        assert!(!out.join("ghost").exists());
        assert!(out.join("alice/src/main.cpp").is_file());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn pruning_never_removes_the_submission_dir() {
        let root = temp_root();
        let subs = root.join("subs");
        fs::create_dir_all(&subs).unwrap();
        fs::write(subs.join("gus_1_2_a.cpp"), "").unwrap();

        SubmissionNormalizer::default().normalize(&subs, &root).unwrap();

        assert!(subs.join("gus_1_2_a.cpp").is_file());
        assert!(root.join("gus/src/a.cpp").is_file());

        let _ = fs::remove_dir_all(root);
    }
}
