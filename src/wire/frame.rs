//! Frame encoding and decoding.
//!
//! Three datagram shapes share one UDP port:
//! - full frames (12-byte header, reliable, carry sequence numbers),
//! - mini voice frames (4-byte header, unreliable, 16-bit timestamp),
//! - mini video frames (6-byte header, unreliable, 15-bit timestamp).
//!
//! All multi-byte fields are big-endian on the wire.

use thiserror::Error;

/// Header size constants.
pub mod sizes {
    /// Full frame header size.
    pub const FULL_HEADER_SIZE: usize = 12;
    /// Mini voice frame header size.
    pub const MINI_HEADER_SIZE: usize = 4;
    /// Mini video frame header size (zero sentinel + call number + timestamp).
    pub const VIDEO_HEADER_SIZE: usize = 6;
    /// Largest datagram the engine will build or accept.
    pub const MAX_DATAGRAM: usize = 4096;
}

/// Bit flags packed into header fields.
pub mod flags {
    /// Full-frame marker in the source call number field.
    pub const FULL: u16 = 0x8000;
    /// Retransmission marker in the destination call number field.
    pub const RETRANS: u16 = 0x8000;
    /// Video marker in a mini video frame's call number field.
    pub const VIDEO: u16 = 0x8000;
    /// Key-frame marker in a mini video frame's 15-bit timestamp field.
    pub const VIDEO_KEY: u16 = 0x8000;
    /// Valid call number bits.
    pub const CALLNO_MASK: u16 = 0x7FFF;
    /// Compressed-subclass marker (value is a power-of-two bit index).
    pub const SUBCLASS_LOG: u8 = 0x80;
    /// Bit-index mask of a compressed subclass byte.
    pub const SUBCLASS_LOG_MASK: u8 = 0x1F;
    /// Key-frame parity bit inside a compressed video subclass byte.
    pub const VIDEO_SUBCLASS_KEY: u8 = 0x40;
}

/// Frame type byte of a full frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// A single DTMF digit (subclass is the digit).
    Dtmf = 1,
    /// Audio payload (subclass is the format bit).
    Voice = 2,
    /// Video payload (subclass is the format bit, low bit marks key frames).
    Video = 3,
    /// Call supervision (answer, ringing, busy...).
    Control = 4,
    /// Empty frame.
    Null = 5,
    /// Protocol management (the [`super::command::IaxCommand`] namespace).
    Iax = 6,
    /// Text message payload.
    Text = 7,
    /// Image payload (subclass is the format bit).
    Image = 8,
    /// HTML-related payload.
    Html = 9,
    /// Comfort noise (subclass is the noise level).
    Cng = 10,
}

impl FrameType {
    /// Parse a frame type from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Dtmf),
            2 => Some(Self::Voice),
            3 => Some(Self::Video),
            4 => Some(Self::Control),
            5 => Some(Self::Null),
            6 => Some(Self::Iax),
            7 => Some(Self::Text),
            8 => Some(Self::Image),
            9 => Some(Self::Html),
            10 => Some(Self::Cng),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Compress a 32-bit subclass into the single header byte.
///
/// Values below 0x80 travel verbatim. Exact powers of two travel as their
/// bit index with the high bit set. Anything else cannot be represented.
fn compress_subclass(subclass: u32) -> Option<u8> {
    if subclass < 0x80 {
        Some(subclass as u8)
    } else if subclass.is_power_of_two() {
        Some(flags::SUBCLASS_LOG | subclass.trailing_zeros() as u8)
    } else {
        None
    }
}

/// Expand a compressed subclass byte back to its 32-bit value.
fn uncompress_subclass(byte: u8) -> u32 {
    if byte & flags::SUBCLASS_LOG != 0 {
        1u32 << (byte & flags::SUBCLASS_LOG_MASK)
    } else {
        u32::from(byte)
    }
}

/// Full frame header (12 bytes).
///
/// Wire format:
/// ```text
/// +--------------+--------------+-----------+-------+-------+------+------+
/// | F | src call | R | dst call | timestamp | oseq  | iseq  | type | csub |
/// | 2 bytes      | 2 bytes      | 4 bytes   | 1 byte| 1 byte| 1 B  | 1 B  |
/// +--------------+--------------+-----------+-------+-------+------+------+
/// ```
/// `F` marks the frame as full; `R` marks a retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullHeader {
    /// Sender's call number (15 bits).
    pub src_call: u16,
    /// Receiver's call number (15 bits), zero when not yet learned.
    pub dst_call: u16,
    /// Whether the retransmission bit is set.
    pub retransmitted: bool,
    /// Full 32-bit timestamp, milliseconds on the sender's call clock.
    pub timestamp: u32,
    /// Outbound sequence number of this frame.
    pub oseqno: u8,
    /// Next inbound sequence number the sender expects.
    pub iseqno: u8,
    /// Frame type.
    pub frame_type: FrameType,
    /// Decompressed subclass. For video frames the low bit is the
    /// key-frame marker, carried at bit 6 of the compressed byte.
    pub subclass: u32,
}

impl FullHeader {
    /// Serialize to the 12-byte wire form.
    ///
    /// Fails when the subclass is neither small nor a power of two.
    pub fn to_bytes(&self) -> Result<[u8; sizes::FULL_HEADER_SIZE], FrameError> {
        let csub = match self.frame_type {
            FrameType::Video => {
                let key = (self.subclass & 1) as u8;
                compress_subclass(self.subclass & !1)
                    .map(|c| c | (key << 6))
            }
            _ => compress_subclass(self.subclass),
        }
        .ok_or(FrameError::UnencodableSubclass(self.subclass))?;

        let mut buf = [0u8; sizes::FULL_HEADER_SIZE];
        let src = (self.src_call & flags::CALLNO_MASK) | flags::FULL;
        let mut dst = self.dst_call & flags::CALLNO_MASK;
        if self.retransmitted {
            dst |= flags::RETRANS;
        }
        buf[0..2].copy_from_slice(&src.to_be_bytes());
        buf[2..4].copy_from_slice(&dst.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8] = self.oseqno;
        buf[9] = self.iseqno;
        buf[10] = self.frame_type.as_byte();
        buf[11] = csub;
        Ok(buf)
    }

    /// Parse from the start of a datagram known to carry the full flag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < sizes::FULL_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: sizes::FULL_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let src = u16::from_be_bytes([bytes[0], bytes[1]]);
        let dst = u16::from_be_bytes([bytes[2], bytes[3]]);
        let frame_type =
            FrameType::from_byte(bytes[10]).ok_or(FrameError::InvalidType(bytes[10]))?;
        let subclass = match frame_type {
            FrameType::Video => {
                let key = u32::from(bytes[11] >> 6) & 1;
                uncompress_subclass(bytes[11] & !flags::VIDEO_SUBCLASS_KEY) | key
            }
            _ => uncompress_subclass(bytes[11]),
        };
        Ok(Self {
            src_call: src & flags::CALLNO_MASK,
            dst_call: dst & flags::CALLNO_MASK,
            retransmitted: dst & flags::RETRANS != 0,
            timestamp: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            oseqno: bytes[8],
            iseqno: bytes[9],
            frame_type,
            subclass,
        })
    }
}

/// Mini voice frame header (4 bytes): call number with the full flag clear,
/// then the low 16 bits of the voice timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniHeader {
    /// Sender's call number (15 bits).
    pub src_call: u16,
    /// Low 16 bits of the sender's voice timestamp.
    pub timestamp: u16,
}

impl MiniHeader {
    /// Serialize to the 4-byte wire form.
    pub fn to_bytes(&self) -> [u8; sizes::MINI_HEADER_SIZE] {
        let mut buf = [0u8; sizes::MINI_HEADER_SIZE];
        buf[0..2].copy_from_slice(&(self.src_call & flags::CALLNO_MASK).to_be_bytes());
        buf[2..4].copy_from_slice(&self.timestamp.to_be_bytes());
        buf
    }
}

/// Mini video frame header (6 bytes): a zero sentinel, the call number with
/// the video flag, then a 15-bit timestamp whose high bit marks key frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHeader {
    /// Sender's call number (15 bits).
    pub src_call: u16,
    /// Low 15 bits of the sender's video timestamp.
    pub timestamp: u16,
    /// Whether this frame starts a key frame.
    pub key_frame: bool,
}

impl VideoHeader {
    /// Serialize to the 6-byte wire form.
    pub fn to_bytes(&self) -> [u8; sizes::VIDEO_HEADER_SIZE] {
        let mut buf = [0u8; sizes::VIDEO_HEADER_SIZE];
        let call = (self.src_call & flags::CALLNO_MASK) | flags::VIDEO;
        let mut ts = self.timestamp & 0x7FFF;
        if self.key_frame {
            ts |= flags::VIDEO_KEY;
        }
        buf[2..4].copy_from_slice(&call.to_be_bytes());
        buf[4..6].copy_from_slice(&ts.to_be_bytes());
        buf
    }
}

/// A parsed datagram, borrowing its payload from the receive buffer.
#[derive(Debug)]
pub enum Datagram<'a> {
    /// Full frame: header plus IE bytes or media payload.
    Full(FullHeader, &'a [u8]),
    /// Mini voice frame: header plus codec payload.
    Mini(MiniHeader, &'a [u8]),
    /// Mini video frame: header plus codec payload.
    Video(VideoHeader, &'a [u8]),
}

/// Classify and parse one received datagram.
///
/// The leading u16 decides the shape: full flag set means a full frame, an
/// all-zero word means a video frame, anything else is a mini voice frame.
pub fn parse_datagram(buf: &[u8]) -> Result<Datagram<'_>, FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::TooShort {
            expected: 2,
            actual: buf.len(),
        });
    }
    let lead = u16::from_be_bytes([buf[0], buf[1]]);
    if lead & flags::FULL != 0 {
        let header = FullHeader::from_bytes(buf)?;
        Ok(Datagram::Full(header, &buf[sizes::FULL_HEADER_SIZE..]))
    } else if lead == 0 {
        if buf.len() < sizes::VIDEO_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: sizes::VIDEO_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        let call = u16::from_be_bytes([buf[2], buf[3]]);
        let ts = u16::from_be_bytes([buf[4], buf[5]]);
        Ok(Datagram::Video(
            VideoHeader {
                src_call: call & flags::CALLNO_MASK,
                timestamp: ts & 0x7FFF,
                key_frame: ts & flags::VIDEO_KEY != 0,
            },
            &buf[sizes::VIDEO_HEADER_SIZE..],
        ))
    } else {
        if buf.len() < sizes::MINI_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: sizes::MINI_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Datagram::Mini(
            MiniHeader {
                src_call: lead & flags::CALLNO_MASK,
                timestamp: u16::from_be_bytes([buf[2], buf[3]]),
            },
            &buf[sizes::MINI_HEADER_SIZE..],
        ))
    }
}

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Datagram is too short for its shape.
    #[error("datagram too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Unknown frame type byte.
    #[error("invalid frame type: 0x{0:02x}")]
    InvalidType(u8),

    /// The subclass is neither below 0x80 nor a power of two.
    #[error("subclass 0x{0:08x} does not fit in a compressed byte")]
    UnencodableSubclass(u32),
}
