//! Modulo-256 sequence number arithmetic.
//!
//! Sequence numbers live in an 8-bit circular space. All ordering questions
//! assume fewer than 128 frames are ever outstanding at once, which the
//! retry policy guarantees in practice: with that precondition a distance
//! below 128 always means "at or behind".

/// Circular distance from `from` to `to`.
pub fn delta(from: u8, to: u8) -> u8 {
    to.wrapping_sub(from)
}

/// True when `seq` is at or behind `reference` in circular order.
pub fn at_or_before(seq: u8, reference: u8) -> bool {
    delta(seq, reference) < 128
}

/// True when an acknowledged sequence number `iseqno` falls inside the
/// live window `[rseqno, oseqno]`.
pub fn within_window(rseqno: u8, oseqno: u8, iseqno: u8) -> bool {
    iseqno == oseqno || delta(rseqno, iseqno) < delta(rseqno, oseqno)
}
