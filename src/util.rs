#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use walkdir::WalkDir;
use which::which;

use crate::{error::WorkspaceError, submission::is_hidden};

/// Finds and returns the path to `program` on `PATH`.
///
/// A path with more than one component is resolved against the current
/// directory and returned absolute, since steps run in a different one.
pub fn tool_path(program: &str) -> Result<OsString> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path
            .canonicalize()
            .map(PathBuf::into_os_string)
            .with_context(|| format!("Cannot find `{program}`"));
    }

    which(program)
        .map(PathBuf::into_os_string)
        .with_context(|| format!("Cannot find `{program}` on path"))
}

/// Recursively copies the contents of `from` into `to`, creating directories
/// as needed and overwriting files that already exist.
///
/// Hidden entries directly below `from` are skipped; hidden entries deeper in
/// the tree are copied like any other file.
pub fn copy_tree(from: &Path, to: &Path) -> Result<usize, WorkspaceError> {
    let mut copied = 0;
    let walker = WalkDir::new(from)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || !is_hidden(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(|e| WorkspaceError::Read {
            path:   e.path().unwrap_or(from).to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|source| WorkspaceError::Create {
                path: target.clone(),
                source,
            })?;
        } else {
            copy_file(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Copies a single file, creating the parent directory of `to` first.
pub fn copy_file(from: &Path, to: &Path) -> Result<(), WorkspaceError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|source| WorkspaceError::Create {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::copy(from, to).map_err(|source| WorkspaceError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    Ok(())
}
