//! Jitter buffer seam.
//!
//! The engine never smooths media itself; every session consumes an injected
//! [`JitterBuffer`] implementation and feeds it timestamped events. The
//! trait's contract mirrors what the dispatch loop needs: put on arrival,
//! get on the receive clock, and a hint for the next delivery time so the
//! poll loop can size its transport timeout.

use std::collections::VecDeque;

use crate::engine::event::Event;

/// Network quality counters, in both directions: what the local buffer
/// measured, and what the peer reported through PONG elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStats {
    /// Interarrival jitter, milliseconds.
    pub jitter: u32,
    /// Loss percentage.
    pub loss_pct: u32,
    /// Lost frame count.
    pub loss_count: u32,
    /// Frames received.
    pub packets: u32,
    /// Maximum playout delay, milliseconds.
    pub delay: u32,
    /// Frames dropped by the buffer.
    pub dropped: u32,
    /// Frames that arrived out of order.
    pub out_of_order: u32,
}

/// What kind of frame is being queued; buffers may treat these differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Timed voice frame.
    Voice,
    /// Timed video frame.
    Video,
    /// Comfort noise.
    Silence,
    /// Everything else that rides the receive clock (control, text...).
    Control,
}

/// Outcome of queueing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// The frame was accepted.
    Queued,
    /// The frame was refused (too late, buffer full); caller drops it.
    Dropped,
}

/// Outcome of polling the buffer for the next deliverable frame.
#[derive(Debug)]
pub enum GetResult {
    /// Deliver this event now.
    Frame(Event),
    /// A voice frame is due but missing; the caller synthesizes
    /// an interpolation frame of the given length.
    Interpolate {
        /// Timestamp the missing frame would have carried.
        timestamp: u32,
    },
    /// This event arrived too late to play; the caller discards it.
    Drop(Event),
    /// Nothing is due yet.
    NoFrame,
    /// The buffer is empty.
    Empty,
}

/// A per-session jitter buffer.
///
/// `now_ms` arguments are milliseconds on the session's receive clock.
pub trait JitterBuffer {
    /// Queue a received event.
    fn put(
        &mut self,
        event: Event,
        kind: FrameKind,
        frame_ms: u32,
        timestamp: u32,
        now_ms: u32,
    ) -> PutResult;

    /// Poll for the next deliverable event. `interp_ms` is the codec's
    /// interpolation frame length, used when a voice frame is missing.
    fn get(&mut self, now_ms: u32, interp_ms: u32) -> GetResult;

    /// Milliseconds (receive clock) of the next scheduled delivery, if any.
    fn next_delivery(&self) -> Option<u32>;

    /// Remove and return everything still queued.
    fn drain(&mut self) -> Vec<Event>;

    /// Forget all timing history (used when a transfer resets the clock).
    fn reset(&mut self);

    /// Current quality counters.
    fn stats(&self) -> NetStats;
}

/// Trivial buffer that delivers frames in arrival order as soon as polled.
///
/// No smoothing, no loss concealment; useful for tests and for applications
/// that do their own playout scheduling.
#[derive(Debug, Default)]
pub struct PassthroughJitterBuffer {
    queue: VecDeque<Event>,
    packets: u32,
}

impl PassthroughJitterBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl JitterBuffer for PassthroughJitterBuffer {
    fn put(
        &mut self,
        event: Event,
        _kind: FrameKind,
        _frame_ms: u32,
        _timestamp: u32,
        _now_ms: u32,
    ) -> PutResult {
        self.queue.push_back(event);
        self.packets = self.packets.wrapping_add(1);
        PutResult::Queued
    }

    fn get(&mut self, _now_ms: u32, _interp_ms: u32) -> GetResult {
        match self.queue.pop_front() {
            Some(event) => GetResult::Frame(event),
            None => GetResult::Empty,
        }
    }

    fn next_delivery(&self) -> Option<u32> {
        if self.queue.is_empty() { None } else { Some(0) }
    }

    fn drain(&mut self) -> Vec<Event> {
        self.queue.drain(..).collect()
    }

    fn reset(&mut self) {
        self.queue.clear();
    }

    fn stats(&self) -> NetStats {
        NetStats {
            packets: self.packets,
            ..NetStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::event::EventKind;
    use crate::engine::session::CallNumber;

    fn voice_event(ts: u32) -> Event {
        Event {
            call: CallNumber::new(1).unwrap(),
            kind: EventKind::Voice {
                format: 1 << 2,
                timestamp: ts,
                data: vec![0x55],
            },
        }
    }

    #[test]
    fn test_passthrough_order() {
        let mut jb = PassthroughJitterBuffer::new();
        jb.put(voice_event(20), FrameKind::Voice, 20, 20, 0);
        jb.put(voice_event(40), FrameKind::Voice, 20, 40, 1);

        assert_eq!(jb.next_delivery(), Some(0));
        let first = match jb.get(5, 20) {
            GetResult::Frame(ev) => ev,
            other => panic!("expected frame, got {other:?}"),
        };
        match first.kind {
            EventKind::Voice { timestamp, .. } => assert_eq!(timestamp, 20),
            other => panic!("expected voice, got {other:?}"),
        }
        assert!(matches!(jb.get(5, 20), GetResult::Frame(_)));
        assert!(matches!(jb.get(5, 20), GetResult::Empty));
        assert_eq!(jb.next_delivery(), None);
    }

    #[test]
    fn test_passthrough_drain_and_stats() {
        let mut jb = PassthroughJitterBuffer::new();
        jb.put(voice_event(20), FrameKind::Voice, 20, 20, 0);
        jb.put(voice_event(40), FrameKind::Voice, 20, 40, 0);
        assert_eq!(jb.stats().packets, 2);
        assert_eq!(jb.drain().len(), 2);
        assert!(matches!(jb.get(0, 20), GetResult::Empty));
    }
}
