// Durable handoff for updates that arrive before the daemon listens
//
// One slot per terminal: <handoff_dir>/shell-<key>. Producers write a temp file
// and rename it over the slot, so the slot only ever names a complete payload.
// The daemon drains the slot once at startup, and sweeps up temp and claimed
// files left behind by writers that died mid-operation.

use crate::modeline::address::TerminalKey;
use crate::modeline::codec::MAX_PAYLOAD_SIZE;
use crate::modeline::config::ensure_private_dir;
use crate::modeline::error::{ModelineError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes temp files of concurrent writers within one process
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Single-slot per-terminal pending update store
#[derive(Debug, Clone)]
pub struct HandoffStore {
    dir: PathBuf,
}

impl HandoffStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path of the pending update for a terminal
    pub fn path_for(&self, key: &TerminalKey) -> PathBuf {
        self.dir.join(key.handoff_file_name())
    }

    /// Atomically replace the pending update for `key` with `payload`
    ///
    /// A later publish wins over an earlier one; a reader never sees a
    /// partially written file.
    pub fn publish(&self, key: &TerminalKey, payload: &[u8]) -> Result<()> {
        ensure_private_dir(&self.dir).map_err(|e| ModelineError::handoff(&self.dir, e))?;

        let final_path = self.path_for(key);
        // Temp file per writer so concurrent producers never interleave bytes
        let temp_path = self.dir.join(format!(
            "{}.tmp.{}.{}",
            key.handoff_file_name(),
            std::process::id(),
            TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = write_new_file(&temp_path, payload) {
            let _ = fs::remove_file(&temp_path);
            return Err(ModelineError::handoff(&temp_path, e));
        }

        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(ModelineError::handoff(&final_path, e));
        }

        tracing::debug!(path = %final_path.display(), bytes = payload.len(), "published pending update");
        Ok(())
    }

    /// Take the pending update for `key`, if any
    ///
    /// The slot is claimed by renaming it to a name private to this process
    /// before reading, then deleted. A missing slot is not an error.
    pub fn consume(&self, key: &TerminalKey) -> Result<Option<Vec<u8>>> {
        self.remove_abandoned(key);

        let final_path = self.path_for(key);
        let claimed_path = self.dir.join(format!(
            "{}.claimed.{}.{}",
            key.handoff_file_name(),
            std::process::id(),
            TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));

        match fs::rename(&final_path, &claimed_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ModelineError::handoff(&final_path, e)),
        }

        let read = read_bounded(&claimed_path);
        let removed = fs::remove_file(&claimed_path);

        let payload = read.map_err(|e| ModelineError::handoff(&claimed_path, e))?;
        if let Err(e) = removed {
            tracing::warn!(path = %claimed_path.display(), error = %e, "failed to remove drained update");
        }

        tracing::debug!(path = %final_path.display(), bytes = payload.len(), "drained pending update");
        Ok(Some(payload))
    }

    /// Delete temp and claimed files for `key` whose owning process is gone
    fn remove_abandoned(&self, key: &TerminalKey) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let slot = key.handoff_file_name();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let owner = match name.to_str().and_then(|name| leftover_owner(name, &slot)) {
                Some(owner) => owner,
                None => continue,
            };
            if process_alive(owner) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::debug!(path = %entry.path().display(), owner, "removed abandoned handoff file");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove abandoned handoff file");
                }
            }
        }
    }
}

/// Pid embedded in `<slot>.tmp.<pid>.<seq>` or `<slot>.claimed.<pid>.<seq>`
fn leftover_owner(name: &str, slot: &str) -> Option<u32> {
    let rest = name.strip_prefix(slot)?;
    let rest = rest
        .strip_prefix(".tmp.")
        .or_else(|| rest.strip_prefix(".claimed."))?;
    let (pid, seq) = rest.split_once('.')?;
    seq.parse::<u64>().ok()?;
    pid.parse().ok()
}

fn process_alive(pid: u32) -> bool {
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) => pid,
        Err(_) => return false,
    };
    // SAFETY: signal 0 only performs the existence and permission check
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn write_new_file(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

fn read_bounded(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut payload = Vec::new();
    file.take(MAX_PAYLOAD_SIZE as u64).read_to_end(&mut payload)?;
    Ok(payload)
}
