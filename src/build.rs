#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Build strategy selection and the CMake -> Make -> direct-command fallback
//! chain.

use std::{
    ffi::OsString,
    fmt::Display,
    future::Future,
    io,
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{classify::visible_entries, error::ProcessError, process::run_collect, util::tool_path};

/// Exit status recorded when a step's program cannot be started.
pub const SPAWN_FAILURE_STATUS: i32 = 127;
/// Exit status recorded when a step exceeds its deadline.
pub const TIMEOUT_STATUS: i32 = 124;

/// Line appended to the output before falling back to the direct command.
pub fn fallback_notice(status: i32) -> String {
    format!("==> make failed (status {status}), falling back to direct compiler command\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// How a workspace is built, decided by the descriptors at its top level.
pub enum BuildStrategy {
    /// `CMakeLists.txt` present: `cmake .` then `make`.
    CMake,
    /// Only a `Makefile`: `make`.
    Makefile,
    /// No descriptor: the configured compiler command.
    DirectCommand,
}

impl BuildStrategy {
    /// Picks a strategy from top-level file names.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut strategy = Self::DirectCommand;
        for name in names {
            match name {
                "CMakeLists.txt" => return Self::CMake,
                "Makefile" => strategy = Self::Makefile,
                _ => {}
            }
        }
        strategy
    }

    /// Looks at the current, non-hidden top-level contents of `root`.
    pub fn probe(root: &Path) -> io::Result<Self> {
        let listing = visible_entries(root)?;
        Ok(Self::from_names(listing.iter().map(|l| l.name.as_str())))
    }
}

impl Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CMake => "cmake",
            Self::Makefile => "make",
            Self::DirectCommand => "direct",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// One external step of a build.
pub enum StepKind {
    /// `cmake .`
    Configure,
    /// `make`
    Make,
    /// The shell-interpreted compiler command.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A fully specified external invocation.
pub struct BuildStep {
    /// Which step of the chain this is.
    pub kind:    StepKind,
    /// Program to run.
    pub program: String,
    /// Arguments passed to the program.
    pub args:    Vec<OsString>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Exit status and captured output of a single step.
pub struct StepOutcome {
    /// exit status of the step
    pub exit_code: i32,
    /// stderr followed by stdout
    pub output:    String,
}

impl StepOutcome {
    /// Creates an outcome.
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Running totals across the steps of one unit of the chain.
pub struct Accumulated {
    /// sum of exit codes
    pub exit_code: i32,
    /// outputs concatenated in execution order
    pub output:    String,
    /// whether the direct-command fallback was entered after a failed make
    pub fell_back: bool,
}

impl Accumulated {
    /// Adds a step's outcome to the totals.
    fn absorb(mut self, outcome: StepOutcome) -> Self {
        self.exit_code = self.exit_code.saturating_add(outcome.exit_code);
        self.output.push_str(&outcome.output);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// States of the fallback chain. Every non-terminal state names the step to
/// run next and carries what has been accumulated so far.
pub enum BuildState {
    /// About to run `cmake .`.
    ProbeCMake,
    /// About to run `make`.
    RunMake(Accumulated),
    /// About to run the direct compiler command.
    FallbackDirect(Accumulated),
    /// Finished.
    Done(Accumulated),
}

impl BuildState {
    /// Entry state for a strategy.
    pub fn initial(strategy: BuildStrategy) -> Self {
        match strategy {
            BuildStrategy::CMake => Self::ProbeCMake,
            BuildStrategy::Makefile => Self::RunMake(Accumulated::default()),
            BuildStrategy::DirectCommand => Self::FallbackDirect(Accumulated::default()),
        }
    }

    /// The step this state wants to run, or `None` once done.
    pub fn pending_step(&self) -> Option<StepKind> {
        match self {
            Self::ProbeCMake => Some(StepKind::Configure),
            Self::RunMake(_) => Some(StepKind::Make),
            Self::FallbackDirect(_) => Some(StepKind::Direct),
            Self::Done(_) => None,
        }
    }

    /// Feeds the outcome of [`Self::pending_step`] and returns the next state.
    ///
    /// `cmake` always continues into `make` and both exit codes are summed.
    /// A nonzero total after `make` enters the fallback with a fresh exit code
    /// but with the output so far, followed by the fallback notice.
    pub fn transition(self, outcome: StepOutcome) -> Self {
        match self {
            Self::ProbeCMake => Self::RunMake(Accumulated::default().absorb(outcome)),
            Self::RunMake(acc) => {
                let acc = acc.absorb(outcome);
                if acc.exit_code == 0 {
                    Self::Done(acc)
                } else {
                    let mut output = acc.output;
                    output.push_str(&fallback_notice(acc.exit_code));
                    Self::FallbackDirect(Accumulated {
                        exit_code: 0,
                        output,
                        fell_back: true,
                    })
                }
            }
            Self::FallbackDirect(acc) => Self::Done(acc.absorb(outcome)),
            done @ Self::Done(_) => done,
        }
    }

    /// The accumulated result, once the chain is done.
    pub fn finished(self) -> Option<Accumulated> {
        match self {
            Self::Done(acc) => Some(acc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Final outcome of building one workspace.
pub struct BuildResult {
    /// 0 on success; otherwise the (summed) failing status
    pub exit_code: i32,
    /// every step's output, in execution order
    pub output:    String,
    /// strategy chosen from the workspace contents, if it could be read
    pub strategy:  Option<BuildStrategy>,
    /// whether the direct command ran because make failed
    pub fell_back: bool,
}

impl BuildResult {
    /// Creates a result with no strategy information.
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            strategy: None,
            fell_back: false,
        }
    }

    /// Whether the build succeeded.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a single build step inside a workspace.
pub trait StepExecutor {
    /// Executes `step` with `cwd` as the child's working directory. Failures to
    /// start or finish the step are reported as a nonzero outcome, never as an
    /// error.
    fn execute(&self, step: &BuildStep, cwd: &Path) -> impl Future<Output = StepOutcome> + Send;
}

#[derive(Debug, Clone, Default)]
/// [`StepExecutor`] backed by real subprocesses.
pub struct ProcessExecutor {
    /// Bounded wait per step.
    step_timeout: Option<Duration>,
}

impl ProcessExecutor {
    /// Creates an executor that kills steps running longer than
    /// `step_timeout`.
    pub fn new(step_timeout: Option<Duration>) -> Self {
        Self { step_timeout }
    }
}

impl StepExecutor for ProcessExecutor {
    async fn execute(&self, step: &BuildStep, cwd: &Path) -> StepOutcome {
        let program = match tool_path(&step.program) {
            Ok(p) => p,
            Err(e) => {
                return StepOutcome::new(
                    SPAWN_FAILURE_STATUS,
                    format!("failed to spawn {}: {e:#}\n", step.program),
                );
            }
        };

        tracing::debug!("Running {} {:?} in {}", step.program, step.args, cwd.display());
        match run_collect(&program, &step.args, Some(cwd), self.step_timeout).await {
            Ok(collected) => StepOutcome::new(collected.exit_code(), collected.combined_output()),
            Err(e @ ProcessError::TimedOut { .. }) => {
                StepOutcome::new(TIMEOUT_STATUS, timeout_output(&e))
            }
            Err(e @ ProcessError::Spawn { .. }) => {
                StepOutcome::new(SPAWN_FAILURE_STATUS, format!("{e}\n"))
            }
            Err(e) => StepOutcome::new(1, format!("{}: {e}\n", step.program)),
        }
    }
}

/// Output of a timed-out step: what it printed, then the timeout notice on
/// its own line.
fn timeout_output(e: &ProcessError) -> String {
    let mut output = match e {
        ProcessError::TimedOut { output, .. } => output.clone(),
        _ => String::new(),
    };
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(&format!("{e}\n"));
    output
}

#[derive(Debug, Clone)]
/// Programs used for each step.
pub struct Toolchain {
    /// cmake executable
    pub cmake:            String,
    /// make executable
    pub make:             String,
    /// shell interpreting the compiler command
    pub shell:            String,
    /// direct compiler command, passed verbatim to `shell -c`
    pub compiler_command: String,
}

impl Toolchain {
    /// Materializes the invocation for `kind`.
    pub fn step(&self, kind: StepKind) -> BuildStep {
        let (program, args) = match kind {
            StepKind::Configure => (&self.cmake, vec![OsString::from(".")]),
            StepKind::Make => (&self.make, vec![]),
            StepKind::Direct => (
                &self.shell,
                vec![OsString::from("-c"), OsString::from(&self.compiler_command)],
            ),
        };
        BuildStep {
            kind,
            program: program.clone(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
/// Builds workspaces by driving [`BuildState`] with a [`StepExecutor`].
pub struct BuildRunner<E> {
    /// programs for each step
    toolchain: Toolchain,
    /// what actually runs the steps
    executor:  E,
}

impl<E: StepExecutor> BuildRunner<E> {
    /// Creates a runner.
    pub fn new(toolchain: Toolchain, executor: E) -> Self {
        Self { toolchain, executor }
    }

    /// Programs used by this runner.
    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Builds the workspace at `root`.
    ///
    /// The strategy is recomputed from what is in `root` right now. Every
    /// step runs with `root` as its own working directory; the current
    /// directory of this process is left alone.
    pub async fn build(&self, root: &Path) -> BuildResult {
        let strategy = match BuildStrategy::probe(root) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Could not inspect {}: {e}", root.display());
                return BuildResult::new(1, format!("could not inspect {}: {e}\n", root.display()));
            }
        };

        let mut state = BuildState::initial(strategy);
        while let Some(kind) = state.pending_step() {
            let step = self.toolchain.step(kind);
            let outcome = self.executor.execute(&step, root).await;
            state = state.transition(outcome);
        }

        let acc = state.finished().unwrap_or_default();

        BuildResult {
            exit_code: acc.exit_code,
            output:    acc.output,
            strategy:  Some(strategy),
            fell_back: acc.fell_back,
        }
    }
}
