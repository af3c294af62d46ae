#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::workspace::StudentWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Where a loose file ends up inside a workspace.
pub enum FileDestination {
    /// Compilation unit, copied to `src/`.
    SourceFile,
    /// Header, copied to `include/`.
    HeaderFile,
    /// Write-up, prebuilt binary or extension-less file, copied to the root.
    DocumentFile,
    /// Anything else; not copied.
    Ignored,
}

impl FileDestination {
    /// Picks a destination from a file extension (without the dot).
    pub fn for_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "c" | "cc" | "cpp" | "cxx" => Self::SourceFile,
            "h" | "hh" | "hpp" | "hxx" => Self::HeaderFile,
            "" | "txt" | "md" | "pdf" | "doc" | "docx" | "word" | "rtf" | "html" | "tex"
            | "exe" | "out" | "bin" => Self::DocumentFile,
            _ => Self::Ignored,
        }
    }

    /// Picks a destination for `path` based on its extension.
    pub fn for_path(path: &Path) -> Self {
        Self::for_extension(path.extension().and_then(|e| e.to_str()).unwrap_or_default())
    }

    /// Directory inside `workspace` that receives files of this kind, if any.
    pub fn directory_in(self, workspace: &StudentWorkspace) -> Option<PathBuf> {
        match self {
            Self::SourceFile => Some(workspace.src_dir()),
            Self::HeaderFile => Some(workspace.include_dir()),
            Self::DocumentFile => Some(workspace.root().to_path_buf()),
            Self::Ignored => None,
        }
    }
}
