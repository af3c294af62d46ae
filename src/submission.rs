#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Separator between the identity token and the rest of a submission name.
pub const IDENTITY_SEPARATOR: char = '_';

/// Number of leading tokens (identity plus two positional ids) an LMS prepends
/// to every loose file, e.g. `alice_123_456_main.cpp`.
const PREFIX_TOKENS: usize = 3;

/// Returns the student identity encoded in a submission file name: the token
/// before the first `_`, or the whole name if there is none.
///
/// ```
/// assert_eq!(cppgrade::submission::identity_of("bob_1_2_proj.zip"), "bob");
/// assert_eq!(cppgrade::submission::identity_of("README"), "README");
/// ```
pub fn identity_of(file_name: &str) -> &str {
    file_name
        .split_once(IDENTITY_SEPARATOR)
        .map_or(file_name, |(identity, _)| identity)
}

/// Removes the `<identity>_<n>_<m>_` prefix from a loose submission file name.
///
/// The remaining tokens are joined back with `_`, so `alice_1_2_my_list.cpp`
/// becomes `my_list.cpp`. Names that are fully consumed by the prefix are
/// returned unchanged.
pub fn strip_identity_prefix(file_name: &str) -> String {
    let rest = file_name
        .splitn(PREFIX_TOKENS + 1, IDENTITY_SEPARATOR)
        .nth(PREFIX_TOKENS)
        .unwrap_or_default();

    if rest.is_empty() {
        file_name.to_string()
    } else {
        rest.to_string()
    }
}

/// Returns true for dot-files and macOS resource-fork folders.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("__MACOSX")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One raw item found at the top level of the submission directory.
pub struct SubmissionEntry {
    /// Where the item lives on disk.
    path:       PathBuf,
    /// Student identity parsed from the item's file name.
    identity:   String,
    /// Whether the item is an archive awaiting expansion.
    is_archive: bool,
}

impl SubmissionEntry {
    /// Creates an entry for `path`; returns `None` when the path has no
    /// UTF-8 file name to derive an identity from.
    pub fn new(path: impl Into<PathBuf>, is_archive: bool) -> Option<Self> {
        let path = path.into();
        let identity = identity_of(path.file_name()?.to_str()?).to_string();
        Some(Self {
            path,
            identity,
            is_archive,
        })
    }

    /// Path of the raw item.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Student identity this item belongs to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether this item is an archive.
    pub fn is_archive(&self) -> bool {
        self.is_archive
    }

    /// File name of the item with the LMS prefix removed.
    pub fn stripped_name(&self) -> Option<String> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .map(strip_identity_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_first_token() {
        assert_eq!(identity_of("alice_123_456_main.cpp"), "alice");
        assert_eq!(identity_of("5120001NAME_late_1_2_x.zip"), "5120001NAME");
        assert_eq!(identity_of("_odd"), "");
    }

    #[test]
    fn prefix_is_stripped_from_loose_files() {
        assert_eq!(strip_identity_prefix("alice_123_456_main.cpp"), "main.cpp");
        assert_eq!(strip_identity_prefix("alice_1_2_my_list.cpp"), "my_list.cpp");
    }

    #[test]
    fn short_names_survive_stripping() {
        assert_eq!(strip_identity_prefix("alice_main.cpp"), "alice_main.cpp");
        assert_eq!(strip_identity_prefix("alice_1_2_"), "alice_1_2_");
        assert_eq!(strip_identity_prefix("main.cpp"), "main.cpp");
    }

    #[test]
    fn hidden_names() {
        assert!(is_hidden(".DS_Store"));
        assert!(is_hidden("__MACOSX"));
        assert!(!is_hidden("src"));
    }

    #[test]
    fn entry_carries_identity() {
        let entry = SubmissionEntry::new("/tmp/subs/bob_1_2_proj", false).unwrap();
        assert_eq!(entry.identity(), "bob");
        assert_eq!(entry.stripped_name().as_deref(), Some("proj"));
        assert!(!entry.is_archive());
    }
}
