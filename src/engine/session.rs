//! Per-call session state.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::jitter::{JitterBuffer, NetStats};

/// Session timing defaults.
pub mod constants {
    use std::time::Duration;

    /// Assumed round trip before the first PONG sample.
    pub const INITIAL_PINGTIME: Duration = Duration::from_millis(100);

    /// Optimistic round trip right after a completed transfer.
    pub const TRANSFER_PINGTIME: Duration = Duration::from_millis(30);

    /// Delay before the first keepalive PING on a new session.
    pub const FIRST_PING: Duration = Duration::from_secs(2);

    /// Keepalive PING period after the first.
    pub const PING_INTERVAL: Duration = Duration::from_secs(10);
}

/// A local call number: 15 bits, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallNumber(u16);

impl CallNumber {
    /// Wrap a raw call number; zero and values above 0x7FFF are invalid.
    pub fn new(raw: u16) -> Option<Self> {
        if raw >= 1 && raw <= 0x7FFF {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// The raw 15-bit value.
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CallNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a session stands in the transfer handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not transferring.
    None,
    /// Handshake started (TXREQ seen or sent).
    Begin,
    /// The candidate path is verified (TXACC exchanged).
    Ready,
    /// This side is released and waits for its counterpart.
    Release,
}

/// State of one call.
///
/// Sessions are owned by the registry and referenced everywhere else by
/// call number; nothing in the engine holds a pointer across a poll.
pub struct Session {
    /// Local call number.
    pub(crate) call: CallNumber,
    /// Peer's call number; zero until the first full frame binds it.
    pub(crate) peer_call: u16,
    /// Peer's transport address.
    pub(crate) peer_addr: SocketAddr,

    /// Candidate peer address during a transfer.
    pub(crate) transfer_addr: Option<SocketAddr>,
    /// Peer's call number on the candidate path.
    pub(crate) transfer_call: u16,
    /// Correlation id shared by both transfer endpoints.
    pub(crate) transfer_id: u32,
    /// Handshake progress.
    pub(crate) transfer_state: TransferState,
    /// Supervisor only: the bridged sibling session.
    pub(crate) transfer_peer: Option<CallNumber>,
    /// Hold music was engaged for this transfer.
    pub(crate) transfer_moh: bool,

    /// Peer asked us to stop sending media.
    pub(crate) quelched: bool,

    /// Our codec capability mask for this call.
    pub(crate) capability: u32,
    /// Format the peer sends us; learned from NEW/ACCEPT or full voice
    /// frames, zero until known. Mini frames cannot arrive before it is set.
    pub(crate) voice_format_in: u32,
    /// Format of our last full voice frame; mini frames reuse it.
    pub(crate) voice_format_out: u32,
    /// Video format the peer sends us.
    pub(crate) video_format_in: u32,
    /// Video format of our last full video frame.
    pub(crate) video_format_out: u32,
    /// Peer's codec preference letters.
    pub(crate) codec_prefs: Option<String>,

    /// Next outbound sequence number.
    pub(crate) oseqno: u8,
    /// Next inbound sequence number we expect.
    pub(crate) iseqno: u8,
    /// Oldest outbound sequence number not yet acknowledged.
    pub(crate) rseqno: u8,
    /// Last iseqno we told the peer about.
    pub(crate) aseqno: u8,
    /// Expected sequence we last sent a VNAK for.
    pub(crate) last_vnak: Option<u8>,

    /// Send-side epoch; timestamps count milliseconds from here.
    pub(crate) tx_epoch: Option<Instant>,
    /// Receive-side epoch for the jitter buffer clock.
    pub(crate) rx_epoch: Option<Instant>,
    /// Timestamp of the last transmitted frame.
    pub(crate) last_sent: u32,
    /// Predicted timestamp of the next voice frame.
    pub(crate) next_pred: u32,
    /// Whether the last voice activity was real audio (not comfort noise).
    pub(crate) not_silent: bool,
    /// Highest timestamp seen from the peer (unwrap reference).
    pub(crate) last_ts: u32,

    /// Smoothed round trip estimate.
    pub(crate) ping_time: Duration,

    /// Username for authentication and registration.
    pub(crate) username: Option<String>,
    /// Shared secret for challenge responses.
    pub(crate) secret: Option<String>,
    /// Last MD5 challenge the peer issued.
    pub(crate) challenge: Option<String>,
    /// Registration refresh period, seconds.
    pub(crate) refresh: u16,

    /// Injected playout buffer.
    pub(crate) jb: Box<dyn JitterBuffer>,
    /// Quality counters the peer last reported via PONG.
    pub(crate) remote_stats: NetStats,
}

impl Session {
    /// Create a fresh session toward `peer_addr`.
    pub(crate) fn new(call: CallNumber, peer_addr: SocketAddr, jb: Box<dyn JitterBuffer>) -> Self {
        Self {
            call,
            peer_call: 0,
            peer_addr,
            transfer_addr: None,
            transfer_call: 0,
            transfer_id: 0,
            transfer_state: TransferState::None,
            transfer_peer: None,
            transfer_moh: false,
            quelched: false,
            capability: 0,
            voice_format_in: 0,
            voice_format_out: 0,
            video_format_in: 0,
            video_format_out: 0,
            codec_prefs: None,
            oseqno: 0,
            iseqno: 0,
            rseqno: 0,
            aseqno: 0,
            last_vnak: None,
            tx_epoch: None,
            rx_epoch: None,
            last_sent: 0,
            next_pred: 0,
            not_silent: false,
            last_ts: 0,
            ping_time: constants::INITIAL_PINGTIME,
            username: None,
            secret: None,
            challenge: None,
            refresh: 0,
            jb,
            remote_stats: NetStats::default(),
        }
    }

    /// Local call number.
    pub fn call(&self) -> CallNumber {
        self.call
    }

    /// Peer transport address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether a transfer handshake is in progress.
    pub fn transferring(&self) -> bool {
        self.transfer_state != TransferState::None
    }

    /// Finish a transfer: point the session at its new peer and reset all
    /// per-path state so formats, clocks and the jitter buffer start over.
    ///
    /// `to_transfer_addr` moves the session onto the candidate path (the
    /// endpoint case); the supervisor keeps its address and only swaps call
    /// numbers. Sequence numbers survive unless `reset_seq`.
    pub(crate) fn complete_transfer(
        &mut self,
        new_peer_call: u16,
        to_transfer_addr: bool,
        reset_seq: bool,
    ) {
        if to_transfer_addr {
            if let Some(addr) = self.transfer_addr {
                self.peer_addr = addr;
            }
        }
        self.peer_call = new_peer_call;
        self.transfer_addr = None;
        self.transfer_call = 0;
        self.transfer_id = 0;
        self.transfer_state = TransferState::None;
        self.transfer_peer = None;
        self.transfer_moh = false;

        // Force full-frame format renegotiation on the new path.
        self.voice_format_out = 0;
        self.video_format_out = 0;

        // Both clocks restart.
        self.tx_epoch = None;
        self.rx_epoch = None;
        self.last_sent = 0;
        self.next_pred = 0;
        self.not_silent = false;
        self.last_ts = 0;
        self.last_vnak = None;

        if reset_seq {
            self.oseqno = 0;
            self.iseqno = 0;
            self.rseqno = 0;
            self.aseqno = 0;
        }

        self.ping_time = constants::TRANSFER_PINGTIME;
        self.jb.drain();
        self.jb.reset();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("call", &self.call)
            .field("peer_call", &self.peer_call)
            .field("peer_addr", &self.peer_addr)
            .field("transfer_state", &self.transfer_state)
            .field("oseqno", &self.oseqno)
            .field("iseqno", &self.iseqno)
            .field("rseqno", &self.rseqno)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::PassthroughJitterBuffer;

    fn test_session() -> Session {
        Session::new(
            CallNumber::new(7).unwrap(),
            "10.0.0.1:4569".parse().unwrap(),
            Box::new(PassthroughJitterBuffer::new()),
        )
    }

    #[test]
    fn test_call_number_bounds() {
        assert!(CallNumber::new(0).is_none());
        assert!(CallNumber::new(1).is_some());
        assert!(CallNumber::new(0x7FFF).is_some());
        assert!(CallNumber::new(0x8000).is_none());
    }

    #[test]
    fn test_complete_transfer_moves_endpoint() {
        let mut s = test_session();
        s.peer_call = 42;
        s.oseqno = 9;
        s.iseqno = 4;
        s.voice_format_out = 1 << 2;
        s.last_ts = 12345;
        s.transfer_addr = Some("10.0.0.2:4569".parse().unwrap());
        s.transfer_call = 99;
        s.transfer_state = TransferState::Begin;

        s.complete_transfer(99, true, true);
        assert_eq!(s.peer_addr, "10.0.0.2:4569".parse().unwrap());
        assert_eq!(s.peer_call, 99);
        assert_eq!(s.oseqno, 0);
        assert_eq!(s.iseqno, 0);
        assert_eq!(s.voice_format_out, 0);
        assert_eq!(s.last_ts, 0);
        assert_eq!(s.transfer_state, TransferState::None);
        assert_eq!(s.ping_time, constants::TRANSFER_PINGTIME);
    }

    #[test]
    fn test_complete_transfer_supervisor_keeps_sequence() {
        let mut s = test_session();
        s.peer_call = 10;
        s.oseqno = 5;
        s.iseqno = 6;
        s.transfer_state = TransferState::Release;

        s.complete_transfer(77, false, false);
        assert_eq!(s.peer_addr, "10.0.0.1:4569".parse().unwrap());
        assert_eq!(s.peer_call, 77);
        assert_eq!(s.oseqno, 5);
        assert_eq!(s.iseqno, 6);
    }
}
