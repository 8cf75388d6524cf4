use super::polling::{wait_for_file_content, WaitError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const READY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_TTY: AtomicU32 = AtomicU32::new(0);

/// Everything one test needs to talk to "its" terminal
pub struct TestTerminal {
    pub runtime_dir: PathBuf,
    /// Device path only used for addressing; nothing is opened
    pub tty: PathBuf,
    pub renderer: PathBuf,
}

impl TestTerminal {
    /// Unique fake device per test; abstract socket names are host-global
    pub fn new(runtime_dir: &Path, renderer: &Path) -> Self {
        let tty = PathBuf::from(format!(
            "/dev/pts/it-{}-{}",
            std::process::id(),
            NEXT_TTY.fetch_add(1, Ordering::SeqCst)
        ));
        Self {
            runtime_dir: runtime_dir.to_path_buf(),
            tty,
            renderer: renderer.to_path_buf(),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.runtime_dir.join("kitty-modeline.log")
    }

    pub fn handoff_file(&self) -> PathBuf {
        let key = self.tty.to_string_lossy().replace('/', "-");
        self.runtime_dir
            .join("kitty-modeline")
            .join(format!("shell-{}", key))
    }

    pub fn daemon_command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_kitty-modeline"));
        cmd.arg(&self.tty)
            .env("KITTY_MODELINE_DIR", &self.runtime_dir)
            .env("KITTY_MODELINE_RENDERER", &self.renderer)
            .env("RUST_LOG", "debug")
            .env_remove("KITTY_MODELINE_RENDER_TIMEOUT_MS");
        cmd
    }

    /// Run the client with exactly `vars` as its environment (plus addressing)
    pub fn push(&self, vars: &[(&str, &str)]) -> ExitStatus {
        Command::new(env!("CARGO_BIN_EXE_kitty-modeline-client"))
            .arg("--tty")
            .arg(&self.tty)
            .env_clear()
            .env("KITTY_MODELINE_DIR", &self.runtime_dir)
            .env("PATH", "/usr/bin:/bin")
            .envs(vars.iter().copied())
            .stdin(Stdio::null())
            .status()
            .expect("failed to run kitty-modeline-client")
    }
}

/// RAII wrapper that ensures the daemon process is cleaned up.
pub struct DaemonGuard {
    child: Child,
    stdout_path: PathBuf,
}

impl DaemonGuard {
    /// Start the daemon with stdout captured to `<runtime_dir>/stdout-<n>`
    /// and wait until it logs that it is listening.
    pub fn start(terminal: &TestTerminal) -> Result<Self, WaitError> {
        let stdout_path = terminal.runtime_dir.join(format!(
            "stdout-{}",
            NEXT_TTY.fetch_add(1, Ordering::SeqCst)
        ));
        let stdout = File::create(&stdout_path).expect("failed to create stdout capture");

        let child = terminal
            .daemon_command()
            .stdout(stdout)
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn kitty-modeline");

        let guard = Self { child, stdout_path };
        println!(
            "Started kitty-modeline (pid {}) for {}",
            guard.pid(),
            terminal.tty.display()
        );

        let key = terminal.tty.to_string_lossy().replace('/', "-");
        wait_for_file_content(
            terminal.log_file(),
            |log| log.contains("daemon listening") && log.contains(&key),
            READY_TIMEOUT,
        )?;
        Ok(guard)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stdout(&self) -> Vec<u8> {
        std::fs::read(&self.stdout_path).unwrap_or_default()
    }

    /// SIGTERM and wait for a graceful exit
    pub fn terminate(mut self, timeout: Duration) -> Option<ExitStatus> {
        unsafe {
            libc::kill(self.child.id() as i32, libc::SIGTERM);
        }
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(20));
        }
        None
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(err) = self.child.kill() {
            eprintln!("Failed to kill kitty-modeline pid {}: {}", self.child.id(), err);
            return;
        }
        let _ = self.child.wait();
    }
}

pub fn is_process_running(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Wait for a process to disappear, used to prove a render was killed.
pub fn wait_for_process_exit(pid: i32, timeout: Duration) -> bool {
    let start = Instant::now();
    while is_process_running(pid) {
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
    true
}
