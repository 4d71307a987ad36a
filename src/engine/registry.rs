//! Session ownership and inbound matching.

use std::net::SocketAddr;

use log::{debug, warn};
use rand::Rng;

use crate::engine::session::{CallNumber, Session};
use crate::jitter::JitterBuffer;

/// Owns every live session and hands out call numbers.
///
/// Lookup is a linear scan; a node rarely carries more than a few dozen
/// concurrent calls and the scan keeps destroy-during-iteration trivial.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    next_call: u16,
}

impl SessionRegistry {
    /// Create an empty registry with a randomly seeded call counter.
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            next_call: rand::thread_rng().gen_range(1..=0x7FFF),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Allocate a call number and create a session toward `peer_addr`.
    ///
    /// Call numbers walk 1..=32767 cyclically, skipping live ones.
    pub fn create(
        &mut self,
        peer_addr: SocketAddr,
        jb: Box<dyn JitterBuffer>,
    ) -> Option<CallNumber> {
        for _ in 0..0x7FFF {
            let candidate = self.next_call;
            self.next_call = if self.next_call >= 0x7FFF {
                1
            } else {
                self.next_call + 1
            };
            let call = CallNumber::new(candidate)?;
            if self.get(call).is_none() {
                self.sessions.push(Session::new(call, peer_addr, jb));
                return Some(call);
            }
        }
        None
    }

    /// Look a session up by local call number.
    pub fn get(&self, call: CallNumber) -> Option<&Session> {
        self.sessions.iter().find(|s| s.call == call)
    }

    /// Mutable lookup by local call number.
    pub fn get_mut(&mut self, call: CallNumber) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.call == call)
    }

    /// Remove a session, returning it for teardown.
    pub fn remove(&mut self, call: CallNumber) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.call == call)?;
        Some(self.sessions.swap_remove(idx))
    }

    /// Snapshot of live call numbers, safe to iterate while destroying.
    pub fn calls(&self) -> Vec<CallNumber> {
        self.sessions.iter().map(|s| s.call).collect()
    }

    /// Iterate all sessions.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Match an inbound datagram to a session.
    ///
    /// Forward pass: a transferring session expecting this source on its
    /// candidate path, or a peer-address match where the destination call
    /// number is ours (binding the peer's call number on first contact and
    /// rejecting frames that claim a different one). Reverse pass: the
    /// source call number alone identifies the peer, which is how mini
    /// frames (destination call zero) find their session.
    pub fn match_inbound(
        &mut self,
        src: SocketAddr,
        src_call: u16,
        dst_call: u16,
    ) -> Option<CallNumber> {
        // Forward pass.
        for s in &mut self.sessions {
            if s.transferring() && s.transfer_addr == Some(src) && dst_call == s.call.as_u16() {
                return Some(s.call);
            }
            if s.peer_addr == src && dst_call == s.call.as_u16() {
                if s.peer_call == 0 {
                    s.peer_call = src_call;
                } else if s.peer_call != src_call {
                    warn!(
                        "call {} bound to peer call {} but {src} claims {src_call}",
                        s.call, s.peer_call
                    );
                    continue;
                }
                return Some(s.call);
            }
        }
        // Reverse pass.
        for s in &self.sessions {
            let addr_ok =
                s.peer_addr == src || (s.transferring() && s.transfer_addr == Some(src));
            if addr_ok && s.peer_call != 0 && s.peer_call == src_call {
                return Some(s.call);
            }
        }
        None
    }

    /// Rescue pass for TXCNT probes arriving from an address we have never
    /// seen: correlate by transfer id and call-number pair, then adopt the
    /// datagram's source as the transfer address (symmetric NAT re-mapping).
    pub fn match_txcnt(
        &mut self,
        src: SocketAddr,
        src_call: u16,
        dst_call: u16,
        transfer_id: u32,
    ) -> Option<CallNumber> {
        for s in &mut self.sessions {
            if s.transferring()
                && s.transfer_id == transfer_id
                && s.call.as_u16() == dst_call
                && (s.transfer_call == 0 || s.transfer_call == src_call)
            {
                debug!("call {}: transfer probe re-anchors candidate path to {src}", s.call);
                s.transfer_addr = Some(src);
                if s.transfer_call == 0 {
                    s.transfer_call = src_call;
                }
                return Some(s.call);
            }
        }
        None
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
