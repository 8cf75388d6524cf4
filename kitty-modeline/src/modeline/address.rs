// Terminal addressing
//
// Every client invocation and the daemon for a terminal must agree on the same
// rendezvous name and handoff file without talking to each other first. Both
// are derived from the terminal device path.

use crate::modeline::error::{ModelineError, Result};
use std::ffi::CStr;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

/// Replaces path separators in the device path
const SEPARATOR_SUBSTITUTE: char = '-';

const CHANNEL_PREFIX: &str = "kitty-modeline-";
const CHANNEL_SUFFIX: &str = ".socket";

/// Filename prefix of pending updates inside the handoff directory
pub const HANDOFF_FILE_PREFIX: &str = "shell-";

/// Filesystem and socket-name safe identifier for one terminal device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TerminalKey(String);

impl TerminalKey {
    /// Derive the key from a device path such as `/dev/pts/3`
    pub fn from_device_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy();
        Self(escape_separators(&path))
    }

    /// Key for the terminal behind an open file descriptor
    pub fn for_fd(fd: RawFd) -> Result<Self> {
        let device = terminal_device_name(fd).map_err(ModelineError::NoTerminal)?;
        Ok(Self::from_device_path(device))
    }

    /// Key for the controlling terminal of standard output
    pub fn for_stdout() -> Result<Self> {
        Self::for_fd(io::stdout().as_raw_fd())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abstract socket name the daemon for this terminal listens on
    pub fn channel_name(&self) -> String {
        format!("{}{}{}", CHANNEL_PREFIX, self.0, CHANNEL_SUFFIX)
    }

    /// Final filename of the pending update inside the handoff directory
    pub fn handoff_file_name(&self) -> String {
        format!("{}{}", HANDOFF_FILE_PREFIX, self.0)
    }
}

impl fmt::Display for TerminalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape_separators(path: &str) -> String {
    path.chars()
        .map(|c| {
            if c == std::path::MAIN_SEPARATOR {
                SEPARATOR_SUBSTITUTE
            } else {
                c
            }
        })
        .collect()
}

/// Look up the device name of the terminal behind `fd` (ttyname_r)
fn terminal_device_name(fd: RawFd) -> io::Result<String> {
    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: buf is valid for buf.len() bytes and ttyname_r NUL-terminates on success
    let rc = unsafe { libc::ttyname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    // SAFETY: ttyname_r returned 0, so buf holds a NUL-terminated string
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}
