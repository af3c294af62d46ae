#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::{OsStr, OsString},
    io,
    path::Path,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
    time::timeout,
};

use crate::error::ProcessError;

/// How long pipes may stay open after the child exits or is killed.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Drop guard that terminates a spawned child process, and the process group
/// it leads, if the future waiting on it is dropped.
struct ChildDropGuard {
    /// the child, until it is reaped or killed
    child: Option<Child>,
    /// process group id, equal to the child's pid
    group: Option<u32>,
}

impl ChildDropGuard {
    /// Wraps the provided child process with the drop guard.
    fn new(child: Child) -> Self {
        let group = child.id();
        Self {
            child: Some(child),
            group,
        }
    }

    /// Returns a mutable reference to the underlying child process.
    fn child_mut(&mut self) -> io::Result<&mut Child> {
        self.child
            .as_mut()
            .ok_or_else(|| io::Error::other("child process already taken from guard"))
    }

    /// Kills every process left in the child's group, then the child itself.
    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(group) = self.group.take() {
            kill_group(group);
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

impl Drop for ChildDropGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Sends SIGKILL to a whole process group through the `kill` utility.
#[cfg(unix)]
fn kill_group(group: u32) {
    let status = std::process::Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{group}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        tracing::debug!("Could not kill process group {group}: {e}");
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct Collected {
    /// Exit status returned by the process.
    pub status: ExitStatus,
    /// Contents written to stdout.
    pub stdout: Vec<u8>,
    /// Contents written to stderr.
    pub stderr: Vec<u8>,
}

impl Collected {
    /// Numeric exit code; `128 + signal` on Unix when the process was killed
    /// by a signal, `1` when no code is available at all.
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.status.code() {
            return code;
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = self.status.signal() {
                return 128 + signal;
            }
        }

        1
    }

    /// stderr followed by stdout, decoded lossily.
    pub fn combined_output(&self) -> String {
        combine(&self.stderr, &self.stdout)
    }
}

/// stderr followed by stdout, decoded lossily.
fn combine(stderr: &[u8], stdout: &[u8]) -> String {
    [String::from_utf8_lossy(stderr), String::from_utf8_lossy(stdout)].concat()
}

/// Bytes read from one pipe so far.
type Sink = Arc<Mutex<Vec<u8>>>;

/// Reads a pipe to the end on its own task, appending to `sink` as data
/// arrives so a killed step still leaves what it printed.
fn drain<R>(pipe: R, sink: Sink) -> JoinHandle<io::Result<()>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            sink.lock()
                .expect("output sink poisoned")
                .extend_from_slice(&chunk[..n]);
        }
    })
}

/// Takes the bytes collected in `sink`.
fn take(sink: &Sink) -> Vec<u8> {
    std::mem::take(&mut *sink.lock().expect("output sink poisoned"))
}

/// Spawns a command in `cwd` with a closed stdin and collects stdout/stderr.
///
/// The working directory is handed to the child only; the calling process's
/// own current directory is never changed. On Unix the child leads its own
/// process group. When `deadline` expires the whole group is killed and
/// [`ProcessError::TimedOut`] carries whatever the step printed before that.
/// Background processes still holding the pipes after the child exits are
/// killed once [`PIPE_GRACE`] runs out.
pub async fn run_collect(
    program: impl AsRef<OsStr>,
    args: &[OsString],
    cwd: Option<&Path>,
    deadline: Option<Duration>,
) -> Result<Collected, ProcessError> {
    let program = program.as_ref();
    let program_name = program.to_string_lossy().into_owned();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    cmd.process_group(0);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        program: program_name.clone(),
        reason:  e.to_string(),
    })?;
    let mut guard = ChildDropGuard::new(child);

    let stdout = guard
        .child_mut()?
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("missing stdout pipe"))?;
    let stderr = guard
        .child_mut()?
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("missing stderr pipe"))?;

    let out_sink = Sink::default();
    let err_sink = Sink::default();
    let mut tasks = [drain(stdout, out_sink.clone()), drain(stderr, err_sink.clone())];

    let waited = {
        let wait = guard.child_mut()?.wait();
        match deadline {
            Some(limit) => timeout(limit, wait).await.ok(),
            None => Some(wait.await),
        }
    };

    let status = match waited {
        Some(status) => status?,
        None => {
            guard.kill();
            let _ = timeout(PIPE_GRACE, join_pipes(&mut tasks)).await;
            tasks.iter().for_each(JoinHandle::abort);
            return Err(ProcessError::TimedOut {
                program: program_name,
                limit:   deadline.unwrap_or_default(),
                output:  combine(&take(&err_sink), &take(&out_sink)),
            });
        }
    };

    // The child is reaped; only its group may be left.
    guard.child = None;
    match timeout(PIPE_GRACE, join_pipes(&mut tasks)).await {
        Ok(joined) => joined?,
        Err(_) => {
            tracing::debug!("{program_name} left processes holding its output open");
            guard.kill();
            let _ = timeout(PIPE_GRACE, join_pipes(&mut tasks)).await;
            tasks.iter().for_each(JoinHandle::abort);
        }
    }
    guard.group = None;

    Ok(Collected {
        status,
        stdout: take(&out_sink),
        stderr: take(&err_sink),
    })
}

/// Waits until every pipe reader has hit end of file.
async fn join_pipes(tasks: &mut [JoinHandle<io::Result<()>>]) -> io::Result<()> {
    for task in tasks.iter_mut().filter(|t| !t.is_finished()) {
        task.await.map_err(io::Error::other)??;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn captures_stderr_before_stdout() {
        let out = run_collect("sh", &sh("echo out; echo err 1>&2; exit 3"), None, None)
            .await
            .unwrap();

        assert_eq!(out.exit_code(), 3);
        assert_eq!(out.combined_output(), "err\nout\n");
    }

    #[tokio::test]
    async fn runs_in_requested_directory_without_moving_caller() {
        let before = std::env::current_dir().unwrap();
        let dir = std::env::temp_dir();

        let out = run_collect("sh", &sh("pwd"), Some(&dir), None).await.unwrap();

        let reported = std::path::PathBuf::from(String::from_utf8_lossy(&out.stdout).trim());
        assert_eq!(reported.canonicalize().unwrap(), dir.canonicalize().unwrap());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn deadline_kills_long_running_step() {
        let started = Instant::now();
        let err = run_collect(
            "sh",
            &sh("sleep 30"),
            None,
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run_collect("cppgrade-no-such-program", &[], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn timed_out_step_returns_partial_output() {
        let err = run_collect(
            "sh",
            &sh("echo early; echo warned 1>&2; sleep 30"),
            None,
            Some(Duration::from_millis(500)),
        )
        .await
        .unwrap_err();

        let ProcessError::TimedOut { output, .. } = &err else {
            panic!("expected a timeout, got {err:?}");
        };
        assert_eq!(output, "warned\nearly\n");
        assert_eq!(err.to_string(), "sh timed out after 0s");
    }

    /// Whether `pid` has exited, counting an unreaped zombie as exited.
    #[cfg(target_os = "linux")]
    fn exited(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn deadline_kills_background_children_too() {
        let err = run_collect(
            "sh",
            &sh("sleep 30 & echo $!; wait"),
            None,
            Some(Duration::from_millis(500)),
        )
        .await
        .unwrap_err();

        let ProcessError::TimedOut { output, .. } = err else {
            panic!("expected a timeout");
        };
        let pid = output.trim().to_string();
        assert!(!pid.is_empty());

        let started = Instant::now();
        while !exited(&pid) && started.elapsed() < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(exited(&pid), "background sleep {pid} survived the timeout");
    }

    #[tokio::test]
    async fn background_child_holding_pipes_does_not_hang_collection() {
        let started = Instant::now();
        let out = run_collect("sh", &sh("(sleep 30; echo late) & echo early"), None, None)
            .await
            .unwrap();

        assert_eq!(out.exit_code(), 0);
        assert_eq!(String::from_utf8_lossy(&out.stdout), "early\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
