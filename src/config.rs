#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::PathBuf, time::Duration};

use bon::Builder;

use crate::build::Toolchain;

/// Compiler command used when a submission has no build descriptor.
pub const DEFAULT_COMPILER_COMMAND: &str =
    r#"g++ $(find src -name "*.c" -o -name "*.cpp") -I include -o main -Wall -g -std=c++14"#;

/// Default per-step deadline, in seconds.
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Builder)]
#[builder(on(String, into), on(PathBuf, into))]
/// Settings for one batch run.
pub struct Config {
    /// Directory holding the raw submissions.
    #[builder(default = PathBuf::from("./submissions"))]
    pub submission_dir:      PathBuf,
    /// Directory receiving one workspace per student.
    #[builder(default = PathBuf::from("./output"))]
    pub output_dir:          PathBuf,
    /// Leave existing workspaces untouched.
    #[builder(default)]
    pub keep_output:         bool,
    /// Copy archive contents as-is even without a build descriptor.
    #[builder(default)]
    pub keep_file_structure: bool,
    /// Shell-interpreted fallback build command.
    #[builder(default = DEFAULT_COMPILER_COMMAND.to_string())]
    pub compiler_command:    String,
    /// Shell used for the compiler command.
    #[builder(default = "sh".to_string())]
    pub shell:               String,
    /// cmake executable.
    #[builder(default = "cmake".to_string())]
    pub cmake:               String,
    /// make executable.
    #[builder(default = "make".to_string())]
    pub make:                String,
    /// External extractor for rar archives.
    #[builder(default = "unrar".to_string())]
    pub unrar:               String,
    /// Deadline for each build step in seconds; 0 waits forever.
    #[builder(default = DEFAULT_STEP_TIMEOUT_SECS)]
    pub step_timeout_secs:   u64,
    /// Number of workspaces built concurrently.
    #[builder(default = 1)]
    pub jobs:                usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Reads overrides from `CPPGRADE_*` environment variables on top of the
    /// defaults. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            shell: read_string("CPPGRADE_SHELL").unwrap_or(defaults.shell),
            cmake: read_string("CPPGRADE_CMAKE").unwrap_or(defaults.cmake),
            make: read_string("CPPGRADE_MAKE").unwrap_or(defaults.make),
            unrar: read_string("CPPGRADE_UNRAR").unwrap_or(defaults.unrar),
            step_timeout_secs: read_u64("CPPGRADE_STEP_TIMEOUT_SECS")
                .unwrap_or(defaults.step_timeout_secs),
            jobs: read_u64("CPPGRADE_JOBS")
                .filter(|&n| n > 0)
                .map_or(defaults.jobs, |n| n as usize),
            ..defaults
        }
    }

    /// Deadline for each build step, `None` when disabled.
    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    /// Programs used for the build steps.
    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            cmake:            self.cmake.clone(),
            make:             self.make.clone(),
            shell:            self.shell.clone(),
            compiler_command: self.compiler_command.clone(),
        }
    }
}

/// Reads a non-empty, trimmed environment variable.
fn read_string(env: &str) -> Option<String> {
    std::env::var(env)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Parses an environment variable as an unsigned integer.
fn read_u64(env: &str) -> Option<u64> {
    std::env::var(env)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_in_defaults() {
        let cfg = Config::builder().output_dir("/tmp/out").build();
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.submission_dir, PathBuf::from("./submissions"));
        assert_eq!(cfg.jobs, 1);
        assert!(!cfg.keep_output);
        assert_eq!(cfg.step_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(cfg.toolchain().compiler_command, DEFAULT_COMPILER_COMMAND);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let cfg = Config::builder().step_timeout_secs(0).build();
        assert_eq!(cfg.step_timeout(), None);
        assert_eq!(read_u64("CPPGRADE_TEST_UNSET_VARIABLE"), None);
    }
}
