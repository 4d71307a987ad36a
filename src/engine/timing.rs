//! Timestamp derivation and recovery.
//!
//! Outgoing timestamps count milliseconds from a per-session epoch. Voice
//! frames are paced against a running prediction so small clock jitter never
//! shows on the wire; everything else takes wall time with a 3 ms bump on
//! collision. Incoming mini frames carry truncated timestamps that are
//! re-expanded against the highest value seen so far.

use std::time::{Duration, Instant};

use crate::engine::session::Session;

/// Timestamp policy constants.
pub mod constants {
    /// Largest drift between wall clock and prediction, in milliseconds,
    /// absorbed by nudging the epoch instead of reseeding.
    pub const MAX_TIMESTAMP_SKEW_MS: i64 = 240;

    /// Divisor for the epoch nudge: one tenth of the observed drift.
    pub const SKEW_NUDGE_DIVISOR: i64 = 10;

    /// Bump applied when a derived timestamp would collide with or precede
    /// the previous one.
    pub const COLLISION_STEP_MS: u32 = 3;

    /// Re-expansion threshold for 16-bit mini voice timestamps: a value
    /// landing further than this from the reference is assumed to sit in a
    /// neighboring block.
    pub const MINI_UNWRAP_THRESHOLD_MS: i64 = 50_000;

    /// Re-expansion threshold for 15-bit mini video timestamps.
    pub const VIDEO_UNWRAP_THRESHOLD_MS: i64 = 25_000;

    /// Block size of a 16-bit mini voice timestamp.
    pub const MINI_BLOCK: u32 = 0x1_0000;

    /// Block size of a 15-bit mini video timestamp.
    pub const VIDEO_BLOCK: u32 = 0x8000;
}

/// How a frame's timestamp should be derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Paced voice frame carrying this many samples.
    Voice {
        /// Samples in the payload.
        samples: u32,
    },
    /// Video frame.
    Video,
    /// Genuine protocol frame (PING, LAGRQ...), timed on the wall clock.
    Genuine,
    /// Any other data frame.
    Data,
}

fn nudge_epoch(epoch: &mut Instant, drift_ms: i64) {
    let step = drift_ms / constants::SKEW_NUDGE_DIVISOR;
    if step > 0 {
        *epoch += Duration::from_millis(step as u64);
    } else if step < 0 {
        *epoch = epoch
            .checked_sub(Duration::from_millis((-step) as u64))
            .unwrap_or(*epoch);
    }
}

/// Derive the timestamp for an outgoing frame and update the session's
/// pacing state. A nonzero `explicit` timestamp wins unconditionally (used
/// for echoes such as PONG and LAGRP).
pub fn calc_timestamp(s: &mut Session, explicit: u32, class: FrameClass, now: Instant) -> u32 {
    let epoch = *s.tx_epoch.get_or_insert(now);
    if explicit != 0 {
        s.last_sent = explicit;
        return explicit;
    }
    let mut ms = now.saturating_duration_since(epoch).as_millis() as i64;

    match class {
        FrameClass::Voice { samples } => {
            let frame_ms = i64::from(samples / 8);
            let drift = ms - i64::from(s.next_pred);
            if s.not_silent && drift.abs() <= constants::MAX_TIMESTAMP_SKEW_MS {
                // Stay on the prediction, steering the epoch toward the
                // real clock a tenth of the drift at a time.
                if s.next_pred == 0 {
                    s.next_pred = ms as u32;
                    if s.next_pred <= s.last_sent {
                        s.next_pred = s.last_sent + constants::COLLISION_STEP_MS;
                    }
                } else if drift != 0 {
                    if let Some(epoch) = s.tx_epoch.as_mut() {
                        nudge_epoch(epoch, drift);
                    }
                }
                ms = i64::from(s.next_pred);
            } else {
                // Coming out of silence or badly skewed: reseed on the
                // next codec frame boundary.
                if frame_ms > 0 {
                    let off = ms % frame_ms;
                    if off != 0 {
                        ms += frame_ms - off;
                    }
                }
                if ms <= i64::from(s.last_sent) {
                    ms = i64::from(s.last_sent) + i64::from(constants::COLLISION_STEP_MS);
                }
            }
            s.not_silent = true;
            s.last_sent = ms as u32;
            s.next_pred = ms as u32 + frame_ms as u32;
        }
        FrameClass::Video | FrameClass::Genuine => {
            if ms <= i64::from(s.last_sent) {
                ms = i64::from(s.last_sent) + i64::from(constants::COLLISION_STEP_MS);
            }
            s.last_sent = ms as u32;
        }
        FrameClass::Data => {
            if (ms - i64::from(s.last_sent)).abs() <= constants::MAX_TIMESTAMP_SKEW_MS {
                ms = i64::from(s.last_sent) + i64::from(constants::COLLISION_STEP_MS);
            }
            s.last_sent = ms as u32;
        }
    }
    ms as u32
}

/// Milliseconds on the session's receive clock, starting it if needed.
pub fn rx_elapsed(s: &mut Session, now: Instant) -> u32 {
    let epoch = *s.rx_epoch.get_or_insert(now);
    now.saturating_duration_since(epoch).as_millis() as u32
}

/// Receive clock without starting it.
pub fn rx_elapsed_peek(s: &Session, now: Instant) -> Option<u32> {
    s.rx_epoch
        .map(|epoch| now.saturating_duration_since(epoch).as_millis() as u32)
}

fn unwrap_against(candidate: u32, last: u32, block: u32, threshold: i64) -> u32 {
    let delta = i64::from(candidate) - i64::from(last);
    if delta > threshold {
        candidate.saturating_sub(block)
    } else if delta < -threshold {
        candidate.wrapping_add(block)
    } else {
        candidate
    }
}

/// Re-expand a 16-bit mini voice timestamp against the last full value.
pub fn unwrap_timestamp(ts: u16, last: u32) -> u32 {
    unwrap_against(
        (last & 0xFFFF_0000) | u32::from(ts),
        last,
        constants::MINI_BLOCK,
        constants::MINI_UNWRAP_THRESHOLD_MS,
    )
}

/// Re-expand a 15-bit mini video timestamp against the last full value.
pub fn unwrap_video_timestamp(ts: u16, last: u32) -> u32 {
    unwrap_against(
        (last & 0xFFFF_8000) | u32::from(ts & 0x7FFF),
        last,
        constants::VIDEO_BLOCK,
        constants::VIDEO_UNWRAP_THRESHOLD_MS,
    )
}

/// Fold a PONG round-trip sample into the smoothed estimate.
pub fn update_ping_time(s: &mut Session, sample: Duration) {
    s.ping_time = (s.ping_time * 2 + sample) / 3;
}
