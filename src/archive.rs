#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    process::Command,
};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::{
    aggregate::{FailureKind, FailureRecord},
    classify::visible_entries,
    error::ArchiveError,
    util::tool_path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Archive formats the expander understands.
pub enum ArchiveKind {
    /// PKZIP and compatible.
    Zip,
    /// RAR 1.5 through 5.
    Rar,
}

impl ArchiveKind {
    /// Detects the archive format from the file's leading bytes.
    ///
    /// Office documents and other zip-based containers are reported by their
    /// own type and therefore are not archives here.
    pub fn sniff(path: &Path) -> io::Result<Option<Self>> {
        Ok(infer::get_from_path(path)?.and_then(|kind| match kind.extension() {
            "zip" => Some(Self::Zip),
            "rar" => Some(Self::Rar),
            _ => None,
        }))
    }

    /// Whether the file name claims to be an archive, regardless of content.
    pub fn claimed_by_extension(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip") || e.eq_ignore_ascii_case("rar"))
    }
}

/// Working directory an archive expands into: a sibling named after the
/// archive without its extension, e.g. `subs/bob_1_2_proj.zip` ->
/// `subs/bob_1_2_proj`.
pub fn working_dir_for(archive: &Path, dest_root: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| archive.as_os_str().to_os_string());
    dest_root.join(stem)
}

#[derive(Debug, Clone)]
/// Extracts compressed submissions next to the originals.
pub struct ArchiveExpander {
    /// External program used for rar archives.
    unrar_program: String,
}

impl Default for ArchiveExpander {
    fn default() -> Self {
        Self::new("unrar")
    }
}

impl ArchiveExpander {
    /// Creates an expander that shells out to `unrar_program` for rar files.
    pub fn new(unrar_program: impl Into<String>) -> Self {
        Self {
            unrar_program: unrar_program.into(),
        }
    }

    /// Expands `archive` of the given kind into its working directory under
    /// `dest_root`.
    ///
    /// A previous working directory is destroyed first. On failure the
    /// partially written directory is removed and a [`FailureRecord`] keyed by
    /// the archive path is returned instead.
    pub fn expand(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        dest_root: &Path,
    ) -> Result<PathBuf, FailureRecord> {
        let work_dir = working_dir_for(archive, dest_root);

        let result = reset_dir(&work_dir).map_err(ArchiveError::from).and_then(|_| match kind {
            ArchiveKind::Zip => extract_zip(archive, &work_dir),
            ArchiveKind::Rar => self.extract_rar(archive, &work_dir),
        });

        match result {
            Ok(()) => Ok(work_dir),
            Err(err) => {
                if work_dir.exists()
                    && let Err(e) = fs::remove_dir_all(&work_dir)
                {
                    tracing::warn!("Could not clean up {}: {e}", work_dir.display());
                }
                tracing::warn!("{} could not be processed: {err}", archive.display());
                Err(FailureRecord::new(archive, FailureKind::Extraction, err.to_string()))
            }
        }
    }

    /// Expands every archive found at the top level of `submission_dir`.
    ///
    /// Files whose content is not an archive are left untouched, except that a
    /// file named `*.zip`/`*.rar` that fails to sniff is recorded as a corrupt
    /// archive. Returns the working directories created and one failure record
    /// per archive that could not be expanded.
    pub fn expand_all(&self, submission_dir: &Path) -> io::Result<(Vec<PathBuf>, Vec<FailureRecord>)> {
        let mut expanded = Vec::new();
        let mut failures = Vec::new();

        for entry in visible_entries(submission_dir)? {
            if entry.is_dir {
                continue;
            }

            match ArchiveKind::sniff(&entry.path) {
                Ok(Some(kind)) => match self.expand(&entry.path, kind, submission_dir) {
                    Ok(dir) => {
                        tracing::info!("Extracted {}", entry.name);
                        expanded.push(dir);
                    }
                    Err(record) => failures.push(record),
                },
                Ok(None) if ArchiveKind::claimed_by_extension(&entry.path) => {
                    let err = ArchiveError::Unrecognized {
                        path: entry.path.clone(),
                    };
                    tracing::warn!("{err}");
                    failures.push(FailureRecord::new(
                        &entry.path,
                        FailureKind::Extraction,
                        err.to_string(),
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Could not read {}: {e}", entry.path.display());
                    failures.push(FailureRecord::new(
                        &entry.path,
                        FailureKind::Extraction,
                        e.to_string(),
                    ));
                }
            }
        }

        Ok((expanded, failures))
    }

    /// Extracts a rar archive with the configured external tool.
    fn extract_rar(&self, archive: &Path, work_dir: &Path) -> Result<(), ArchiveError> {
        let program = tool_path(&self.unrar_program).map_err(|_| ArchiveError::ExtractorMissing {
            program: self.unrar_program.clone(),
        })?;

        // unrar wants a trailing separator to treat the target as a directory
        let mut target = work_dir.as_os_str().to_os_string();
        target.push(std::path::MAIN_SEPARATOR_STR);

        let out = Command::new(&program)
            .args(["x", "-o+", "-y", "-idq"])
            .arg(archive)
            .arg(target)
            .output()?;

        if out.status.success() {
            Ok(())
        } else {
            Err(ArchiveError::ExtractorFailed {
                program: self.unrar_program.clone(),
                status:  out.status.code().unwrap_or(-1),
                output:  [
                    String::from_utf8_lossy(&out.stderr),
                    String::from_utf8_lossy(&out.stdout),
                ]
                .concat(),
            })
        }
    }
}

/// Removes `dir` if present and creates it empty.
fn reset_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

/// Extracts a zip archive, refusing entries that would escape `work_dir`.
fn extract_zip(archive: &Path, work_dir: &Path) -> Result<(), ArchiveError> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ArchiveError::UnsafeEntry {
                name: entry.name().to_string(),
            });
        };
        let out_path = work_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode((mode & 0o777) | 0o600))?;
            }
        }
    }

    Ok(())
}
