#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::submission::is_hidden;

/// File names whose presence marks a directory as a buildable project.
pub const DESCRIPTORS: [&str; 2] = ["CMakeLists.txt", "Makefile"];

#[derive(Debug, Clone, PartialEq, Eq)]
/// A visible (non-hidden) directory entry.
pub struct Listed {
    /// Full path of the entry.
    pub path:   PathBuf,
    /// File name of the entry.
    pub name:   String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Lists `dir`, skipping hidden entries and `__MACOSX` folders. Entries are
/// sorted by name so callers never observe `read_dir` ordering.
pub fn visible_entries(dir: &Path) -> io::Result<Vec<Listed>> {
    let mut listed = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if is_hidden(&name) {
            continue;
        }
        listed.push(Listed {
            is_dir: entry.path().is_dir(),
            path: entry.path(),
            name,
        });
    }
    listed.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Shape of an extracted submission.
pub struct FormatVerdict {
    /// The submission sits inside exactly one enclosing folder.
    pub wrapped:        bool,
    /// A `CMakeLists.txt` or `Makefile` was found at the (unwrapped) top.
    pub has_descriptor: bool,
}

impl FormatVerdict {
    /// Computes a verdict from a top-level listing.
    ///
    /// `descend` is asked for the listing of the single enclosing folder, if
    /// there is one. It is called at most once; the unwrap never recurses.
    pub fn evaluate<F>(listing: &[Listed], descend: F) -> io::Result<(Self, Option<PathBuf>)>
    where
        F: FnOnce(&Path) -> io::Result<Vec<Listed>>,
    {
        let (wrapped, inner, has_descriptor) = match listing {
            [only] if only.is_dir => {
                let inner = descend(&only.path)?;
                (true, Some(only.path.clone()), lists_descriptor(&inner))
            }
            _ => (false, None, lists_descriptor(listing)),
        };

        Ok((
            Self {
                wrapped,
                has_descriptor,
            },
            inner,
        ))
    }
}

/// Whether a listing contains a build descriptor.
fn lists_descriptor(listing: &[Listed]) -> bool {
    listing
        .iter()
        .any(|l| DESCRIPTORS.contains(&l.name.as_str()))
}

/// Classifies an extracted submission directory.
pub fn classify(dir: &Path) -> io::Result<FormatVerdict> {
    classify_root(dir).map(|(verdict, _)| verdict)
}

/// Classifies `dir` and also returns the directory that actually holds the
/// submission: the single enclosing folder when wrapped, `dir` otherwise.
pub fn classify_root(dir: &Path) -> io::Result<(FormatVerdict, PathBuf)> {
    let listing = visible_entries(dir)?;
    let (verdict, inner) = FormatVerdict::evaluate(&listing, visible_entries)?;
    Ok((verdict, inner.unwrap_or_else(|| dir.to_path_buf())))
}
