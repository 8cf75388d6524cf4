// Renderer process management
//
// One RenderJob wraps one run of the external prompt program:
// - Spawned in its own process group so one SIGKILL reaches every descendant
// - Output captured through a pipe, bounded at RENDER_OUTPUT_LIMIT
// - Cancelled by the coordinator, or by the optional wall-clock timeout
// - Always reaped before the job task finishes

use crate::modeline::codec::EnvironmentSnapshot;
use crate::modeline::error::{ModelineError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Bytes of renderer output kept; anything beyond is dropped
pub const RENDER_OUTPUT_LIMIT: usize = 4096;

/// Terminal width used when the shell did not export COLUMNS
pub const DEFAULT_COLUMNS: &str = "80";

pub const KEY_CWD: &str = "PWD";
pub const KEY_COLUMNS: &str = "COLUMNS";
pub const KEY_CMD_STATUS: &str = "STARSHIP_CMD_STATUS";
pub const KEY_PIPE_STATUS: &str = "STARSHIP_PIPE_STATUS";
pub const KEY_DURATION: &str = "STARSHIP_DURATION";
pub const KEY_NUM_JOBS: &str = "NUM_JOBS";

/// Zero-width segment markers left in prompts meant for bash's PS1
const ZERO_WIDTH_MARKERS: [&[u8]; 2] = [b"\\[", b"\\]"];

/// Monotonic identity of a render job within one coordinator
pub type JobId = u64;

/// Validated arguments for one renderer invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub cwd: PathBuf,
    pub columns: String,
    pub cmd_status: String,
    pub pipe_status: String,
    pub num_jobs: String,
    pub duration: Option<String>,
}

impl RenderRequest {
    /// Pull the renderer inputs out of a snapshot
    ///
    /// Fails on the first missing required key; COLUMNS and STARSHIP_DURATION
    /// are optional.
    pub fn from_snapshot(snapshot: &EnvironmentSnapshot) -> Result<Self> {
        let required = |key: &'static str| {
            snapshot
                .get(key)
                .map(str::to_string)
                .ok_or(ModelineError::MissingKey(key))
        };

        let cwd = required(KEY_CWD)?;
        let cmd_status = required(KEY_CMD_STATUS)?;
        let pipe_status = required(KEY_PIPE_STATUS)?;
        let num_jobs = required(KEY_NUM_JOBS)?;

        Ok(Self {
            cwd: PathBuf::from(strip_shell_quotes(&cwd)),
            columns: snapshot
                .get(KEY_COLUMNS)
                .unwrap_or(DEFAULT_COLUMNS)
                .to_string(),
            cmd_status,
            pipe_status,
            num_jobs,
            duration: snapshot.get(KEY_DURATION).map(str::to_string),
        })
    }

    /// Arguments following the program name
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "prompt".to_string(),
            "--terminal-width".to_string(),
            self.columns.clone(),
            "--status".to_string(),
            self.cmd_status.clone(),
            "--pipestatus".to_string(),
            self.pipe_status.clone(),
            "--jobs".to_string(),
            self.num_jobs.clone(),
        ];
        if let Some(duration) = &self.duration {
            args.push("--cmd-duration".to_string());
            args.push(duration.clone());
        }
        args
    }
}

/// Drop one leading and one trailing quote character, as left by `declare -p`
fn strip_shell_quotes(value: &str) -> &str {
    let is_quote = |c: char| c == '\'' || c == '"';
    let value = value.strip_prefix(is_quote).unwrap_or(value);
    value.strip_suffix(is_quote).unwrap_or(value)
}

/// Remove `\[` and `\]` markers from renderer output
pub fn strip_zero_width_markers(output: &[u8]) -> Vec<u8> {
    ZERO_WIDTH_MARKERS
        .iter()
        .fold(output.to_vec(), |acc, marker| remove_all(&acc, marker))
}

fn remove_all(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// How a job ended, reported on the coordinator's completion queue
#[derive(Debug)]
pub enum JobOutcome {
    /// Renderer exited; output is bounded but not yet cleaned
    Completed { job: JobId, output: Vec<u8> },
    /// Killed by the wall-clock bound; nothing to emit
    TimedOut { job: JobId },
    /// Capturing output or waiting for the renderer failed
    Failed { job: JobId, error: std::io::Error },
}

impl JobOutcome {
    pub fn job(&self) -> JobId {
        match self {
            JobOutcome::Completed { job, .. }
            | JobOutcome::TimedOut { job }
            | JobOutcome::Failed { job, .. } => *job,
        }
    }
}

/// How the external renderer is located and bounded
#[derive(Debug, Clone)]
pub struct Renderer {
    /// Program name (looked up on the daemon's PATH) or path
    pub program: String,
    pub timeout: Option<Duration>,
}

impl Renderer {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Resolve the program against the daemon's own PATH
    ///
    /// The child gets the snapshot's environment, which may lack PATH.
    fn resolve_program(&self) -> PathBuf {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.to_path_buf();
        }
        std::env::var_os("PATH")
            .and_then(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(program))
                    .find(|candidate| candidate.is_file())
            })
            .unwrap_or_else(|| program.to_path_buf())
    }

    fn command(
        &self,
        request: &RenderRequest,
        snapshot: &EnvironmentSnapshot,
        cwd: Option<&Path>,
    ) -> Command {
        use std::os::unix::process::CommandExt;

        let mut cmd = std::process::Command::new(self.resolve_program());
        cmd.args(request.args())
            .env_clear()
            .envs(snapshot.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // New group led by the renderer, detached from our job control
            .process_group(0);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut cmd = Command::from(cmd);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Spawn in the request's directory, or in ours when that cannot be entered
    ///
    /// The directory change happens in the child, so a directory that exists
    /// but lacks search permission (or vanished since the check) only shows up
    /// as a failed spawn.
    fn launch(
        &self,
        request: &RenderRequest,
        snapshot: &EnvironmentSnapshot,
    ) -> std::io::Result<Child> {
        let cwd = usable_cwd(&request.cwd);
        match self.command(request, snapshot, cwd).spawn() {
            Err(e) if cwd.is_some() => {
                tracing::error!(cwd = %request.cwd.display(), error = %e, "chdir failed, rendering from daemon cwd");
                self.command(request, snapshot, None).spawn()
            }
            spawned => spawned,
        }
    }
}

fn usable_cwd(cwd: &Path) -> Option<&Path> {
    match std::fs::metadata(cwd) {
        Ok(meta) if meta.is_dir() => Some(cwd),
        Ok(_) => {
            tracing::error!(cwd = %cwd.display(), "chdir: not a directory, rendering from daemon cwd");
            None
        }
        Err(e) => {
            tracing::error!(cwd = %cwd.display(), error = %e, "chdir failed, rendering from daemon cwd");
            None
        }
    }
}

/// Handle the coordinator keeps for the in-flight render
pub struct RenderJob {
    id: JobId,
    pgid: Option<i32>,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RenderJob {
    /// Launch the renderer and start driving it on a background task
    ///
    /// The outcome is delivered on `completions`; a cancelled job reports nothing.
    pub fn spawn(
        id: JobId,
        renderer: &Renderer,
        request: &RenderRequest,
        snapshot: &EnvironmentSnapshot,
        completions: mpsc::UnboundedSender<JobOutcome>,
    ) -> Result<Self> {
        let mut child = renderer
            .launch(request, snapshot)
            .map_err(|source| ModelineError::Launch {
                program: renderer.program.clone(),
                source,
            })?;

        // In its own group, so the group id is the child's pid
        let pgid = child.id().map(|pid| pid as i32);
        let stdout = child.stdout.take();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let timeout = renderer.timeout;

        tracing::debug!(job = id, pgid = ?pgid, "renderer launched");

        let task = tokio::spawn(async move {
            if let Some(outcome) = drive(id, child, pgid, stdout, cancel_rx, timeout).await {
                // Receiver gone means the coordinator is shutting down
                let _ = completions.send(outcome);
            }
        });

        Ok(Self {
            id,
            pgid,
            cancel_tx: Some(cancel_tx),
            task,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Process group of the renderer (its pid)
    pub fn pgid(&self) -> Option<i32> {
        self.pgid
    }

    /// Kill the whole process group and wait until the renderer is reaped
    pub async fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            // Err means the job already finished on its own
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!(job = self.id, error = %e, "render task ended abnormally");
        }
    }
}

enum Interrupted {
    Cancelled,
    TimedOut,
}

async fn drive(
    id: JobId,
    mut child: Child,
    pgid: Option<i32>,
    stdout: Option<tokio::process::ChildStdout>,
    mut cancel_rx: oneshot::Receiver<()>,
    timeout: Option<Duration>,
) -> Option<JobOutcome> {
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    let interrupted = tokio::select! {
        biased;
        // A dropped sender counts as cancellation too
        _ = &mut cancel_rx => Interrupted::Cancelled,
        _ = deadline => Interrupted::TimedOut,
        result = capture(&mut child, stdout) => {
            return Some(match result {
                Ok(output) => {
                    tracing::debug!(job = id, bytes = output.len(), "renderer finished");
                    JobOutcome::Completed { job: id, output }
                }
                Err(error) => JobOutcome::Failed { job: id, error },
            });
        }
    };

    terminate(&mut child, pgid).await;

    match interrupted {
        Interrupted::Cancelled => {
            tracing::debug!(job = id, "renderer cancelled by newer update");
            None
        }
        Interrupted::TimedOut => {
            tracing::warn!(job = id, timeout = ?timeout, "renderer exceeded time limit, killed");
            Some(JobOutcome::TimedOut { job: id })
        }
    }
}

/// Read bounded output, close the pipe, then wait for the renderer to exit
async fn capture(
    child: &mut Child,
    stdout: Option<tokio::process::ChildStdout>,
) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::with_capacity(RENDER_OUTPUT_LIMIT);
    if let Some(stdout) = stdout {
        stdout
            .take(RENDER_OUTPUT_LIMIT as u64)
            .read_to_end(&mut output)
            .await?;
        // Pipe dropped here; an overlong renderer gets EPIPE instead of blocking
    }
    let status = child.wait().await?;
    if !status.success() {
        tracing::debug!(status = %status, "renderer exited unsuccessfully");
    }
    Ok(output)
}

async fn terminate(child: &mut Child, pgid: Option<i32>) {
    match pgid {
        Some(pgid) => {
            if let Err(e) = kill_process_group(pgid) {
                tracing::debug!(pgid, error = %e, "killpg failed");
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
    if let Err(e) = child.wait().await {
        tracing::error!(error = %e, "failed to reap renderer");
    }
}

/// SIGKILL every process in the group
pub fn kill_process_group(pgid: i32) -> std::io::Result<()> {
    // SAFETY: killpg has no memory-safety preconditions
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// True while any process of the group still exists (zombies included)
pub fn process_group_exists(pgid: i32) -> bool {
    // SAFETY: signal 0 only performs the existence and permission check
    unsafe { libc::killpg(pgid, 0) == 0 }
}
