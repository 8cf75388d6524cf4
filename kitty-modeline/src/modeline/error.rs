// Error types shared by the daemon and the client
//
// Fatal errors (bind, socket creation) bubble up to the binaries; everything
// that happens while handling a single update is logged and dropped.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelineError {
    /// Standard output (or the given fd) is not a terminal
    #[error("no controlling terminal: {0}")]
    NoTerminal(#[source] io::Error),

    #[error("failed to create channel socket: {0}")]
    Socket(#[source] io::Error),

    /// Another daemon already owns the address, or the address is unusable
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send update to {address}: {source}")]
    Send {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to receive update: {0}")]
    Receive(#[source] io::Error),

    #[error("payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("handoff store error at {}: {source}", .path.display())]
    Handoff {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} not found in passed environment")]
    MissingKey(&'static str),

    #[error("failed to launch renderer {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ModelineError {
    pub(crate) fn handoff(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Handoff {
            path: path.into(),
            source,
        }
    }

    /// True when a bind failed because a live daemon already holds the address
    pub fn is_address_in_use(&self) -> bool {
        matches!(self, Self::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}

pub type Result<T> = std::result::Result<T, ModelineError>;
