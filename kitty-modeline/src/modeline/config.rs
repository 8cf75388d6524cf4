// Environment configuration helpers for the daemon and client
// Handles the per-user runtime directory, handoff directory and log file

use std::path::PathBuf;
use std::time::Duration;

/// Overrides the runtime directory (handoff files and log live below it)
pub const DIR_ENV: &str = "KITTY_MODELINE_DIR";
/// Program used to render the status line
pub const RENDERER_ENV: &str = "KITTY_MODELINE_RENDERER";
/// Wall-clock bound for one render, in milliseconds (0 disables it)
pub const RENDER_TIMEOUT_ENV: &str = "KITTY_MODELINE_RENDER_TIMEOUT_MS";

pub const DEFAULT_RENDERER: &str = "starship";

const HANDOFF_DIR_NAME: &str = "kitty-modeline";
const LOG_FILE_NAME: &str = "kitty-modeline.log";

/// Configuration for daemon paths and settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-user runtime directory
    pub runtime_dir: PathBuf,
    /// Directory holding pending updates (`shell-<key>`)
    pub handoff_dir: PathBuf,
    /// Append-only daemon log
    pub log_file: PathBuf,
    /// Renderer program name (searched on PATH) or path
    pub renderer: String,
    /// Kill renders that run longer than this
    pub render_timeout: Option<Duration>,
}

impl Config {
    /// Build a configuration rooted at the given runtime directory
    pub fn with_runtime_dir(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        Self {
            handoff_dir: runtime_dir.join(HANDOFF_DIR_NAME),
            log_file: runtime_dir.join(LOG_FILE_NAME),
            runtime_dir,
            renderer: DEFAULT_RENDERER.to_string(),
            render_timeout: None,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let runtime_dir = std::env::var_os(DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_runtime_dir);

        let mut config = Self::with_runtime_dir(runtime_dir);

        if let Ok(renderer) = std::env::var(RENDERER_ENV) {
            if !renderer.trim().is_empty() {
                config.renderer = renderer;
            }
        }

        config.render_timeout = std::env::var(RENDER_TIMEOUT_ENV)
            .ok()
            .and_then(|raw| parse_timeout_ms(&raw));

        config
    }

    /// Get the default per-user runtime directory
    fn default_runtime_dir() -> PathBuf {
        // XDG_RUNTIME_DIR on Linux, None on most other platforms
        dirs::runtime_dir().unwrap_or_else(|| {
            // SAFETY: getuid has no failure mode
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/run/user/{}", uid))
        })
    }

    /// Ensure the handoff directory exists with owner-only permissions
    pub fn ensure_handoff_dir(&self) -> std::io::Result<()> {
        ensure_private_dir(&self.handoff_dir)
    }
}

/// Create `dir` (and parents) with mode 0700 if it does not exist yet
pub(crate) fn ensure_private_dir(dir: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    match std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
    {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Parse a millisecond timeout; `0`, empty or garbage means no timeout
pub fn parse_timeout_ms(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}
