//! Reachability probes used by IP-in-use assertions.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// Per-attempt connect timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Port probed to decide whether an IP is taken.
pub const PROBE_PORT: u16 = 80;

/// Opens short-lived connections.
pub trait NetClient: Send + Sync {
    /// Connect to `address` (`host:port`) and close immediately.
    ///
    /// # Errors
    ///
    /// Returns the connect or resolution error.
    fn dial_timeout(&self, address: &str, timeout: Duration) -> io::Result<()>;
}

/// [`NetClient`] backed by blocking TCP connects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpNetClient;

impl NetClient for TcpNetClient {
    fn dial_timeout(&self, address: &str, timeout: Duration) -> io::Result<()> {
        let addrs: Vec<SocketAddr> = address.to_socket_addrs()?.collect();
        let mut last_err =
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {address}"));
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_stream) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

/// Ports the Tinkerbell stack binds on the machine running it.
pub const TINKERBELL_PORTS: [u16; 3] = [80, 42113, 50061];

/// Whether something accepts connections on `ip`.
///
/// Any connect error is read as "not in use", so a host that silently drops
/// traffic yields a false negative.
#[must_use]
pub fn is_ip_in_use(client: &dyn NetClient, ip: &str) -> bool {
    is_port_in_use(client, ip, PROBE_PORT)
}

/// Whether something accepts connections on `host:port`.
#[must_use]
pub fn is_port_in_use(client: &dyn NetClient, host: &str, port: u16) -> bool {
    let address = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    match client.dial_timeout(&address, DIAL_TIMEOUT) {
        Ok(()) => true,
        Err(e) => {
            debug!("Probe of {address} failed, treating as unused: {e}");
            false
        }
    }
}
