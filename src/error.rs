#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
/// Reasons an archive could not be expanded into its working directory.
pub enum ArchiveError {
    /// The file carries an archive extension but its content is neither a zip
    /// nor a rar archive.
    #[error("{} is not a recognizable zip or rar archive", .path.display())]
    Unrecognized {
        /// path to the offending file
        path: PathBuf,
    },
    /// The zip reader rejected the archive (corrupt central directory, bad
    /// compression method, truncated entry, ...).
    #[error("could not decode zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// An entry would have been written outside of the working directory.
    #[error("archive entry `{name}` escapes the extraction directory")]
    UnsafeEntry {
        /// raw entry name as stored in the archive
        name: String,
    },
    /// No external rar extractor could be found on `PATH`.
    #[error("cannot extract rar archives: `{program}` was not found on PATH")]
    ExtractorMissing {
        /// name of the extractor that was looked up
        program: String,
    },
    /// The external rar extractor ran but reported failure.
    #[error("`{program}` exited with status {status}: {output}")]
    ExtractorFailed {
        /// extractor executable
        program: String,
        /// exit status, or -1 when terminated by a signal
        status:  i32,
        /// combined stderr and stdout of the extractor
        output:  String,
    },
    /// Any other I/O failure while reading or writing archive contents.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
/// Failures while creating, replacing or populating a student workspace.
pub enum WorkspaceError {
    /// The identity cannot be used as a directory name.
    #[error("`{identity}` is not a usable workspace name")]
    InvalidIdentity {
        /// offending identity
        identity: String,
    },
    /// A directory could not be created.
    #[error("could not create {}: {source}", .path.display())]
    Create {
        /// directory that was being created
        path:   PathBuf,
        /// underlying I/O error
        source: io::Error,
    },
    /// A stale workspace or staging directory could not be removed.
    #[error("could not remove {}: {source}", .path.display())]
    Remove {
        /// directory that was being removed
        path:   PathBuf,
        /// underlying I/O error
        source: io::Error,
    },
    /// The staging directory could not be moved into place.
    #[error("could not move {} into place at {}: {source}", .from.display(), .to.display())]
    Rename {
        /// staging directory
        from:   PathBuf,
        /// final workspace location
        to:     PathBuf,
        /// underlying I/O error
        source: io::Error,
    },
    /// A file could not be copied into the workspace.
    #[error("could not copy {} to {}: {source}", .from.display(), .to.display())]
    Copy {
        /// source file
        from:   PathBuf,
        /// destination inside the workspace
        to:     PathBuf,
        /// underlying I/O error
        source: io::Error,
    },
    /// A submission directory could not be listed or walked.
    #[error("could not read {}: {source}", .path.display())]
    Read {
        /// directory being listed
        path:   PathBuf,
        /// underlying I/O error
        source: io::Error,
    },
}

#[derive(Debug, Error)]
/// Failures of a single external process invocation.
pub enum ProcessError {
    /// The program could not be located or started.
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// program that was being started
        program: String,
        /// human readable cause (not found, permission denied, ...)
        reason:  String,
    },
    /// The process did not finish within its deadline and was killed.
    #[error("{program} timed out after {}s", .limit.as_secs())]
    TimedOut {
        /// program that was running
        program: String,
        /// the deadline that expired
        limit:   Duration,
        /// stderr then stdout printed before the kill
        output:  String,
    },
    /// Reading the process pipes or waiting on it failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
