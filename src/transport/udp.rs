//! Blocking UDP transport over a standard socket.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use super::Transport;

/// [`Transport`] implementation over one bound UDP socket.
///
/// The poll timeout is applied per call through `SO_RCVTIMEO`; a zero
/// timeout switches the socket to nonblocking for the single receive.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a socket. Pass port zero for an ephemeral port.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self { socket })
    }

    /// Wrap an already-bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Local address of the bound socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match timeout {
            Some(t) if t.is_zero() => {
                self.socket.set_nonblocking(true)?;
                let result = self.socket.recv_from(buf);
                self.socket.set_nonblocking(false)?;
                match result {
                    Ok(pair) => Ok(Some(pair)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(e),
                }
            }
            other => {
                self.socket.set_read_timeout(other)?;
                match self.socket.recv_from(buf) {
                    Ok(pair) => Ok(Some(pair)),
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_roundtrip() {
        let mut server = UdpTransport::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = UdpTransport::bind("127.0.0.1:0").unwrap();

        client.send_to(b"probe", server_addr).unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = server
            .recv_from(&mut buf, Some(Duration::from_secs(2)))
            .unwrap()
            .expect("datagram should arrive");
        assert_eq!(&buf[..len], b"probe");
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[test]
    fn test_zero_timeout_polls_empty() {
        let mut t = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut buf = [0u8; 16];
        assert!(t.recv_from(&mut buf, Some(Duration::ZERO)).unwrap().is_none());
    }

    #[test]
    fn test_short_timeout_expires() {
        let mut t = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut buf = [0u8; 16];
        let got = t
            .recv_from(&mut buf, Some(Duration::from_millis(20)))
            .unwrap();
        assert!(got.is_none());
    }
}
