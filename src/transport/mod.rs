//! Transport seam between the engine and the network.
//!
//! The engine is written against the [`Transport`] trait so tests can run
//! whole call flows over an in-memory network; production code uses
//! [`UdpTransport`].

mod udp;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

pub use udp::UdpTransport;

/// A datagram transport the engine can poll.
pub trait Transport {
    /// Send one datagram to `addr`.
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram into `buf`.
    ///
    /// `timeout` bounds the wait: `None` blocks until a datagram arrives,
    /// zero polls without blocking. Returns `Ok(None)` when the wait ends
    /// empty-handed.
    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>>;
}
