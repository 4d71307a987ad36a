//! Time-ordered scheduler for retransmissions, deferred events and timers.
//!
//! One sorted list drives the whole engine: in-flight reliable frames wait
//! here between retries, absorbed events wait for their delivery time, and
//! the keepalive ping timer re-enqueues itself. The poll loop pops due items
//! and the ack/VNAK passes walk the list in place.

use std::time::{Duration, Instant};

use crate::engine::event::Event;
use crate::engine::session::CallNumber;
use crate::wire::frame::{FrameType, flags};

/// Retry policy constants.
pub mod constants {
    use std::time::Duration;

    /// Reliable frames are attempted this many times.
    pub const MAX_RETRIES: i32 = 10;

    /// Floor of the first retry interval.
    pub const MIN_RETRY: Duration = Duration::from_millis(10);

    /// Ceiling of any retry interval.
    pub const MAX_RETRY: Duration = Duration::from_millis(4000);

    /// Tighter ceiling for transfer-path frames, which must converge fast.
    pub const TRANSFER_MAX_RETRY: Duration = Duration::from_millis(1000);

    /// Backoff multiplier between attempts.
    pub const BACKOFF_FACTOR: u32 = 4;
}

/// Sentinel retry count of an acknowledged frame: it stays in the list
/// until its next due time, then falls out without being sent.
pub const RETRIES_DONE: i32 = -1;

/// First retry interval: twice the smoothed round trip, clamped.
pub fn initial_retry_interval(ping_time: Duration) -> Duration {
    (ping_time * 2).clamp(constants::MIN_RETRY, constants::MAX_RETRY)
}

/// Interval for the attempt after one at `current`.
pub fn next_retry_interval(current: Duration, transfer: bool) -> Duration {
    let cap = if transfer {
        constants::TRANSFER_MAX_RETRY
    } else {
        constants::MAX_RETRY
    };
    (current * constants::BACKOFF_FACTOR).min(cap)
}

/// A reliable full frame waiting for acknowledgement. Owns its encoded
/// bytes so retransmission never re-reads session state.
#[derive(Debug)]
pub struct InFlightFrame {
    /// Session the frame belongs to.
    pub call: CallNumber,
    /// Outbound sequence number, used by the ack window and VNAK.
    pub oseqno: u8,
    /// Frame type, kept for logging.
    pub frame_type: FrameType,
    /// Subclass, kept for logging.
    pub subclass: u32,
    /// Remaining attempts; [`RETRIES_DONE`] once acknowledged.
    pub retries: i32,
    /// Interval before the next attempt.
    pub retry_interval: Duration,
    /// Destroy the session when this frame is done.
    pub is_final: bool,
    /// Send on the transfer path instead of the peer path.
    pub transfer: bool,
    /// Encoded datagram.
    pub data: Vec<u8>,
}

impl InFlightFrame {
    /// Whether the frame has been acknowledged.
    pub fn acked(&self) -> bool {
        self.retries == RETRIES_DONE
    }

    /// Mark acknowledged; the frame is discarded when it next comes due.
    pub fn neutralize(&mut self) {
        self.retries = RETRIES_DONE;
    }

    /// Set the retransmission bit in the encoded header.
    pub fn mark_retransmitted(&mut self) {
        if self.data.len() >= 4 {
            let dst = u16::from_be_bytes([self.data[2], self.data[3]]) | flags::RETRANS;
            self.data[2..4].copy_from_slice(&dst.to_be_bytes());
        }
    }
}

/// Self-rearming timers.
#[derive(Debug, Clone, Copy)]
pub enum Timer {
    /// Keepalive ping for one session.
    Ping {
        /// Session to ping.
        call: CallNumber,
    },
}

/// What a schedule slot holds.
#[derive(Debug)]
pub enum ItemKind {
    /// An event due for delivery.
    Event(Event),
    /// A reliable frame due for (re)transmission.
    Frame(InFlightFrame),
    /// A timer due to fire.
    Timer(Timer),
}

#[derive(Debug)]
struct Slot {
    due: Instant,
    kind: ItemKind,
}

/// The engine's single time-ordered work list.
#[derive(Debug, Default)]
pub struct Scheduler {
    items: Vec<Slot>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert an item, keeping the list sorted by due time. Items sharing
    /// a due time keep insertion order.
    pub fn insert(&mut self, due: Instant, kind: ItemKind) {
        let pos = self.items.partition_point(|slot| slot.due <= due);
        self.items.insert(pos, Slot { due, kind });
    }

    /// Time until the earliest item, zero if overdue, `None` when empty.
    pub fn next_wake(&self, now: Instant) -> Option<Duration> {
        self.items
            .first()
            .map(|slot| slot.due.saturating_duration_since(now))
    }

    /// Pop the earliest item if it is due.
    pub fn pop_due(&mut self, now: Instant) -> Option<ItemKind> {
        if self.items.first().is_some_and(|slot| slot.due <= now) {
            Some(self.items.remove(0).kind)
        } else {
            None
        }
    }

    /// Walk the in-flight frames of one session.
    pub fn frames_mut(&mut self, call: CallNumber) -> impl Iterator<Item = &mut InFlightFrame> {
        self.items.iter_mut().filter_map(move |slot| match &mut slot.kind {
            ItemKind::Frame(f) if f.call == call => Some(f),
            _ => None,
        })
    }

    /// Detach a session: its frames are neutralized (they fall out when
    /// due) and its pending events and timers are removed outright.
    pub fn purge_session(&mut self, call: CallNumber) {
        for slot in &mut self.items {
            if let ItemKind::Frame(f) = &mut slot.kind {
                if f.call == call {
                    f.neutralize();
                }
            }
        }
        self.items.retain(|slot| match &slot.kind {
            ItemKind::Event(ev) => ev.call != call,
            ItemKind::Timer(Timer::Ping { call: c }) => *c != call,
            ItemKind::Frame(_) => true,
        });
    }
}
