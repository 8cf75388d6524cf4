// Rendezvous channel between shell hooks and the per-terminal daemon
//
// Connectionless Unix datagrams. On Linux the daemon binds an abstract name, so
// nothing is left on disk when it dies and a second bind for the same terminal
// fails with AddrInUse. Elsewhere a socket file in the handoff directory stands
// in for the abstract name.
//
// Sends are best effort: any failure means "use the handoff store instead".

use crate::modeline::address::TerminalKey;
use crate::modeline::codec::MAX_PAYLOAD_SIZE;
use crate::modeline::error::{ModelineError, Result};
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::{Path, PathBuf};

/// Where the daemon for one terminal listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    name: String,
    /// Socket file used where abstract names are unavailable
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    fallback_path: PathBuf,
}

impl ChannelAddress {
    /// `socket_dir` is only used on platforms without abstract sockets
    pub fn for_key(key: &TerminalKey, socket_dir: &Path) -> Self {
        let name = key.channel_name();
        Self {
            fallback_path: socket_dir.join(&name),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(target_os = "linux")]
    fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        use std::os::linux::net::SocketAddrExt;
        SocketAddr::from_abstract_name(self.name.as_bytes())
    }

    #[cfg(not(target_os = "linux"))]
    fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        SocketAddr::from_pathname(&self.fallback_path)
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[cfg(target_os = "linux")]
        {
            write!(f, "@{}", self.name)
        }
        #[cfg(not(target_os = "linux"))]
        {
            write!(f, "{}", self.fallback_path.display())
        }
    }
}

/// Push one payload to the daemon listening on `address`
///
/// Non-blocking; fails when no daemon is bound, its queue is full, or the
/// payload is too large for a single message.
pub fn send(address: &ChannelAddress, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ModelineError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_SIZE,
        });
    }

    let socket = UnixDatagram::unbound().map_err(ModelineError::Socket)?;
    socket
        .set_nonblocking(true)
        .map_err(ModelineError::Socket)?;

    let send_err = |source| ModelineError::Send {
        address: address.to_string(),
        source,
    };
    let addr = address.socket_addr().map_err(send_err)?;
    let sent = socket.send_to_addr(payload, &addr).map_err(send_err)?;
    if sent != payload.len() {
        return Err(send_err(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!("short datagram: {} of {} bytes", sent, payload.len()),
        )));
    }
    Ok(())
}

/// Daemon side of the channel; owns the address until dropped
pub struct Listener {
    socket: tokio::net::UnixDatagram,
    address: ChannelAddress,
    buf: Vec<u8>,
}

impl Listener {
    /// Bind `address` exclusively. Must be called inside a tokio runtime.
    pub fn bind(address: &ChannelAddress) -> Result<Self> {
        let bind_err = |source| ModelineError::Bind {
            address: address.to_string(),
            source,
        };

        #[cfg(not(target_os = "linux"))]
        reclaim_stale_socket(&address.fallback_path);

        let addr = address.socket_addr().map_err(bind_err)?;
        let socket = UnixDatagram::bind_addr(&addr).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        let socket = tokio::net::UnixDatagram::from_std(socket).map_err(bind_err)?;

        Ok(Self {
            socket,
            address: address.clone(),
            buf: vec![0u8; MAX_PAYLOAD_SIZE],
        })
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Wait for the next message; one producer send is one message
    ///
    /// Cancel safe: dropping the future before it completes loses nothing.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        let n = self
            .socket
            .recv(&mut self.buf)
            .await
            .map_err(ModelineError::Receive)?;
        Ok(self.buf[..n].to_vec())
    }
}

#[cfg(not(target_os = "linux"))]
impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.address.fallback_path);
    }
}

/// Remove a socket file left behind by a daemon that did not exit cleanly.
/// A live daemon answers the connect, in which case the file stays and bind fails.
#[cfg(not(target_os = "linux"))]
fn reclaim_stale_socket(path: &Path) {
    if !path.exists() {
        return;
    }
    let alive = UnixDatagram::unbound()
        .and_then(|socket| socket.connect(path))
        .is_ok();
    if !alive {
        let _ = std::fs::remove_file(path);
    }
}
