#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkspaceError;

/// Name of the sources sub-folder of every workspace.
pub const SRC_DIR: &str = "src";
/// Name of the headers sub-folder of every workspace.
pub const INCLUDE_DIR: &str = "include";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Canonical output directory of one student.
pub struct StudentWorkspace {
    /// Student identity; unique per output directory.
    identity: String,
    /// `<output>/<identity>`.
    root:     PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// What [`StudentWorkspace::prepare`] did on disk.
pub enum Preparation {
    /// The workspace was (re)created empty, with `src/` and `include/`.
    Created,
    /// The workspace already existed and was left untouched.
    Kept,
}

impl StudentWorkspace {
    /// Describes the workspace of `identity` under `output_dir` without
    /// touching the filesystem.
    pub fn new(output_dir: &Path, identity: &str) -> Result<Self, WorkspaceError> {
        if identity.is_empty()
            || identity == "."
            || identity == ".."
            || identity.contains(['/', '\\'])
        {
            return Err(WorkspaceError::InvalidIdentity {
                identity: identity.to_string(),
            });
        }

        Ok(Self {
            identity: identity.to_string(),
            root:     output_dir.join(identity),
        })
    }

    /// Makes sure the workspace exists with its fixed sub-folders.
    ///
    /// With `keep_output` an existing workspace is returned as
    /// [`Preparation::Kept`]. Otherwise a fresh tree is assembled in a hidden
    /// staging directory next to it and renamed over any previous workspace,
    /// so the workspace is never observed half-created.
    pub fn prepare(&self, keep_output: bool) -> Result<Preparation, WorkspaceError> {
        if keep_output && self.root.is_dir() {
            return Ok(Preparation::Kept);
        }

        let parent = self.root.parent().unwrap_or(Path::new("."));
        let staging = parent.join(format!(".{}.staging-{}", self.identity, Uuid::new_v4().simple()));

        if let Err(e) = self.populate_staging(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if self.root.exists() {
            if let Err(source) = fs::remove_dir_all(&self.root) {
                let _ = fs::remove_dir_all(&staging);
                return Err(WorkspaceError::Remove {
                    path: self.root.clone(),
                    source,
                });
            }
        }

        fs::rename(&staging, &self.root).map_err(|source| {
            let _ = fs::remove_dir_all(&staging);
            WorkspaceError::Rename {
                from: staging.clone(),
                to: self.root.clone(),
                source,
            }
        })?;

        Ok(Preparation::Created)
    }

    /// Creates the root, `src/` and `include/` of a staging tree, in that order.
    fn populate_staging(&self, staging: &Path) -> Result<(), WorkspaceError> {
        for dir in [staging.to_path_buf(), staging.join(SRC_DIR), staging.join(INCLUDE_DIR)] {
            fs::create_dir(&dir).map_err(|source| WorkspaceError::Create { path: dir, source })?;
        }
        Ok(())
    }

    /// Student identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `src/` inside the workspace.
    pub fn src_dir(&self) -> PathBuf {
        self.root.join(SRC_DIR)
    }

    /// `include/` inside the workspace.
    pub fn include_dir(&self) -> PathBuf {
        self.root.join(INCLUDE_DIR)
    }
}
