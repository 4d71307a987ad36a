//! Information elements: the tag-length-value stream carried by full frames.
//!
//! Outbound lists are built with [`IeList`]; inbound streams parse into the
//! typed [`Ies`] view. Unknown tags and wrong-length numeric values are
//! logged and skipped so newer peers never break a call; only a declared
//! length overrunning the buffer is fatal to the frame.

use std::net::SocketAddrV4;

use log::{debug, warn};
use thiserror::Error;

use crate::wire::frame::sizes;

/// Information element identifiers the engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IeId {
    /// Number or extension being called.
    CalledNumber = 1,
    /// Calling number.
    CallingNumber = 2,
    /// Calling number ANI (billing).
    CallingAni = 3,
    /// Calling name.
    CallingName = 4,
    /// Context for the called number.
    CalledContext = 5,
    /// Username for authentication.
    Username = 6,
    /// Password (cleartext authentication only).
    Password = 7,
    /// Actual codec capability bitmask.
    Capability = 8,
    /// Desired codec format bit.
    Format = 9,
    /// Desired language.
    Language = 10,
    /// Protocol version.
    Version = 11,
    /// Originally dialed DNID.
    Dnid = 13,
    /// Authentication methods bitmask.
    AuthMethods = 14,
    /// Challenge data for MD5/RSA.
    Challenge = 15,
    /// MD5 challenge result.
    Md5Result = 16,
    /// Apparent address of a peer (16-byte sockaddr_in image).
    ApparentAddr = 18,
    /// Registration refresh period in seconds.
    Refresh = 19,
    /// Dialplan status bits.
    DpStatus = 20,
    /// Call number of a peer.
    CallNo = 21,
    /// Cause text.
    Cause = 22,
    /// Echoed unknown IE id.
    IaxUnknown = 23,
    /// How many messages are waiting.
    MsgCount = 24,
    /// Request auto-answer (marker, zero length).
    AutoAnswer = 25,
    /// Hold music marker on QUELCH (zero length).
    MusicOnHold = 26,
    /// Transfer handshake correlation id.
    TransferId = 27,
    /// Codec preference order as letters.
    CodecPrefs = 45,
    /// Measured jitter in milliseconds.
    RrJitter = 46,
    /// Loss percentage (high byte) and loss count (low 24 bits).
    RrLoss = 47,
    /// Frames received.
    RrPkts = 48,
    /// Maximum playout delay in milliseconds.
    RrDelay = 49,
    /// Dropped frames.
    RrDropped = 50,
    /// Frames received out of order.
    RrOoo = 51,
}

impl IeId {
    /// Parse an identifier from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::CalledNumber),
            2 => Some(Self::CallingNumber),
            3 => Some(Self::CallingAni),
            4 => Some(Self::CallingName),
            5 => Some(Self::CalledContext),
            6 => Some(Self::Username),
            7 => Some(Self::Password),
            8 => Some(Self::Capability),
            9 => Some(Self::Format),
            10 => Some(Self::Language),
            11 => Some(Self::Version),
            13 => Some(Self::Dnid),
            14 => Some(Self::AuthMethods),
            15 => Some(Self::Challenge),
            16 => Some(Self::Md5Result),
            18 => Some(Self::ApparentAddr),
            19 => Some(Self::Refresh),
            20 => Some(Self::DpStatus),
            21 => Some(Self::CallNo),
            22 => Some(Self::Cause),
            23 => Some(Self::IaxUnknown),
            24 => Some(Self::MsgCount),
            25 => Some(Self::AutoAnswer),
            26 => Some(Self::MusicOnHold),
            27 => Some(Self::TransferId),
            45 => Some(Self::CodecPrefs),
            46 => Some(Self::RrJitter),
            47 => Some(Self::RrLoss),
            48 => Some(Self::RrPkts),
            49 => Some(Self::RrDelay),
            50 => Some(Self::RrDropped),
            51 => Some(Self::RrOoo),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Byte budget for one frame's IE payload.
const MAX_IE_BYTES: usize = sizes::MAX_DATAGRAM - sizes::FULL_HEADER_SIZE;

/// Length of the sockaddr_in image used by [`IeId::ApparentAddr`].
const SOCKADDR_IN_LEN: usize = 16;

/// Append-style builder for an outbound IE stream.
#[derive(Debug, Default, Clone)]
pub struct IeList {
    buf: Vec<u8>,
}

impl IeList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw tag-length-value entry.
    pub fn append_raw(&mut self, id: IeId, data: &[u8]) -> Result<(), IeError> {
        if data.len() > u8::MAX as usize || self.buf.len() + 2 + data.len() > MAX_IE_BYTES {
            return Err(IeError::Overflow { max: MAX_IE_BYTES });
        }
        self.buf.push(id.as_byte());
        self.buf.push(data.len() as u8);
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Append a zero-length marker entry.
    pub fn append_flag(&mut self, id: IeId) -> Result<(), IeError> {
        self.append_raw(id, &[])
    }

    /// Append a string entry.
    pub fn append_str(&mut self, id: IeId, value: &str) -> Result<(), IeError> {
        self.append_raw(id, value.as_bytes())
    }

    /// Append a u8 entry.
    pub fn append_byte(&mut self, id: IeId, value: u8) -> Result<(), IeError> {
        self.append_raw(id, &[value])
    }

    /// Append a big-endian u16 entry.
    pub fn append_short(&mut self, id: IeId, value: u16) -> Result<(), IeError> {
        self.append_raw(id, &value.to_be_bytes())
    }

    /// Append a big-endian u32 entry.
    pub fn append_int(&mut self, id: IeId, value: u32) -> Result<(), IeError> {
        self.append_raw(id, &value.to_be_bytes())
    }

    /// Append an IPv4 socket address as a 16-byte sockaddr_in image:
    /// little-endian family 2, big-endian port and address, zero padding.
    pub fn append_addr(&mut self, id: IeId, addr: SocketAddrV4) -> Result<(), IeError> {
        let mut data = [0u8; SOCKADDR_IN_LEN];
        data[0..2].copy_from_slice(&2u16.to_le_bytes());
        data[2..4].copy_from_slice(&addr.port().to_be_bytes());
        data[4..8].copy_from_slice(&addr.ip().octets());
        self.append_raw(id, &data)
    }

    /// Finished byte stream.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Typed view over a received IE stream. Every field is optional; senders
/// only include what the command needs.
#[derive(Debug, Default, Clone)]
pub struct Ies {
    /// Number or extension being called.
    pub called_number: Option<String>,
    /// Calling number.
    pub calling_number: Option<String>,
    /// Calling ANI.
    pub calling_ani: Option<String>,
    /// Calling name.
    pub calling_name: Option<String>,
    /// Context for the called number.
    pub called_context: Option<String>,
    /// Username.
    pub username: Option<String>,
    /// Cleartext password.
    pub password: Option<String>,
    /// Codec capability bitmask.
    pub capability: Option<u32>,
    /// Desired format bit.
    pub format: Option<u32>,
    /// Desired language.
    pub language: Option<String>,
    /// Protocol version.
    pub version: Option<u16>,
    /// Originally dialed DNID.
    pub dnid: Option<String>,
    /// Authentication method bits.
    pub auth_methods: Option<u16>,
    /// Authentication challenge.
    pub challenge: Option<String>,
    /// MD5 challenge result.
    pub md5_result: Option<String>,
    /// Apparent peer address.
    pub apparent_addr: Option<SocketAddrV4>,
    /// Registration refresh seconds.
    pub refresh: Option<u16>,
    /// Dialplan status bits.
    pub dpstatus: Option<u16>,
    /// Peer call number.
    pub callno: Option<u16>,
    /// Cause text.
    pub cause: Option<String>,
    /// Echoed unknown IE id.
    pub iax_unknown: Option<u8>,
    /// Waiting message count.
    pub msgcount: Option<u16>,
    /// Auto-answer marker present.
    pub autoanswer: bool,
    /// Hold-music marker present.
    pub musiconhold: bool,
    /// Transfer correlation id.
    pub transferid: Option<u32>,
    /// Codec preference letters.
    pub codec_prefs: Option<String>,
    /// Reported jitter, milliseconds.
    pub rr_jitter: Option<u32>,
    /// Reported loss percentage and count.
    pub rr_loss: Option<u32>,
    /// Reported frames received.
    pub rr_pkts: Option<u32>,
    /// Reported maximum playout delay, milliseconds.
    pub rr_delay: Option<u16>,
    /// Reported dropped frames.
    pub rr_dropped: Option<u32>,
    /// Reported out-of-order frames.
    pub rr_ooo: Option<u32>,
}

fn read_u16(data: &[u8]) -> Option<u16> {
    match data {
        [a, b] => Some(u16::from_be_bytes([*a, *b])),
        _ => None,
    }
}

fn read_u32(data: &[u8]) -> Option<u32> {
    match data {
        [a, b, c, d] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

fn read_addr(data: &[u8]) -> Option<SocketAddrV4> {
    if data.len() != SOCKADDR_IN_LEN {
        return None;
    }
    let port = u16::from_be_bytes([data[2], data[3]]);
    let ip = std::net::Ipv4Addr::new(data[4], data[5], data[6], data[7]);
    Some(SocketAddrV4::new(ip, port))
}

fn read_str(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

impl Ies {
    /// Parse a received IE stream.
    ///
    /// Logs and skips unknown tags and wrong-length numeric values; a
    /// declared length overrunning the buffer fails the whole stream.
    pub fn parse(mut data: &[u8]) -> Result<Self, IeError> {
        let mut ies = Self::default();
        while !data.is_empty() {
            if data.len() < 2 {
                return Err(IeError::Truncated {
                    ie: data[0],
                    declared: 0,
                    remaining: 0,
                });
            }
            let raw_id = data[0];
            let len = data[1] as usize;
            if len > data.len() - 2 {
                return Err(IeError::Truncated {
                    ie: raw_id,
                    declared: len,
                    remaining: data.len() - 2,
                });
            }
            let value = &data[2..2 + len];
            data = &data[2 + len..];

            let Some(id) = IeId::from_byte(raw_id) else {
                debug!("skipping unknown information element {raw_id} ({len} bytes)");
                continue;
            };
            ies.apply(id, value);
        }
        Ok(ies)
    }

    fn apply(&mut self, id: IeId, value: &[u8]) {
        // Wrong-length numeric values are dropped here, not fatal.
        let mut bad_len = false;
        match id {
            IeId::CalledNumber => self.called_number = Some(read_str(value)),
            IeId::CallingNumber => self.calling_number = Some(read_str(value)),
            IeId::CallingAni => self.calling_ani = Some(read_str(value)),
            IeId::CallingName => self.calling_name = Some(read_str(value)),
            IeId::CalledContext => self.called_context = Some(read_str(value)),
            IeId::Username => self.username = Some(read_str(value)),
            IeId::Password => self.password = Some(read_str(value)),
            IeId::Language => self.language = Some(read_str(value)),
            IeId::Dnid => self.dnid = Some(read_str(value)),
            IeId::Challenge => self.challenge = Some(read_str(value)),
            IeId::Md5Result => self.md5_result = Some(read_str(value)),
            IeId::Cause => self.cause = Some(read_str(value)),
            IeId::CodecPrefs => self.codec_prefs = Some(read_str(value)),
            IeId::Capability => match read_u32(value) {
                Some(v) => self.capability = Some(v),
                None => bad_len = true,
            },
            IeId::Format => match read_u32(value) {
                Some(v) => self.format = Some(v),
                None => bad_len = true,
            },
            IeId::Version => match read_u16(value) {
                Some(v) => self.version = Some(v),
                None => bad_len = true,
            },
            IeId::AuthMethods => match read_u16(value) {
                Some(v) => self.auth_methods = Some(v),
                None => bad_len = true,
            },
            IeId::ApparentAddr => match read_addr(value) {
                Some(v) => self.apparent_addr = Some(v),
                None => bad_len = true,
            },
            IeId::Refresh => match read_u16(value) {
                Some(v) => self.refresh = Some(v),
                None => bad_len = true,
            },
            IeId::DpStatus => match read_u16(value) {
                Some(v) => self.dpstatus = Some(v),
                None => bad_len = true,
            },
            IeId::CallNo => match read_u16(value) {
                Some(v) => self.callno = Some(v),
                None => bad_len = true,
            },
            IeId::IaxUnknown => match value {
                [v] => self.iax_unknown = Some(*v),
                _ => bad_len = true,
            },
            IeId::MsgCount => match read_u16(value) {
                Some(v) => self.msgcount = Some(v),
                None => bad_len = true,
            },
            IeId::AutoAnswer => self.autoanswer = true,
            IeId::MusicOnHold => self.musiconhold = true,
            IeId::TransferId => match read_u32(value) {
                Some(v) => self.transferid = Some(v),
                None => bad_len = true,
            },
            IeId::RrJitter => match read_u32(value) {
                Some(v) => self.rr_jitter = Some(v),
                None => bad_len = true,
            },
            IeId::RrLoss => match read_u32(value) {
                Some(v) => self.rr_loss = Some(v),
                None => bad_len = true,
            },
            IeId::RrPkts => match read_u32(value) {
                Some(v) => self.rr_pkts = Some(v),
                None => bad_len = true,
            },
            IeId::RrDelay => match read_u16(value) {
                Some(v) => self.rr_delay = Some(v),
                None => bad_len = true,
            },
            IeId::RrDropped => match read_u32(value) {
                Some(v) => self.rr_dropped = Some(v),
                None => bad_len = true,
            },
            IeId::RrOoo => match read_u32(value) {
                Some(v) => self.rr_ooo = Some(v),
                None => bad_len = true,
            },
        }
        if bad_len {
            warn!(
                "information element {:?} has unexpected length {}, skipped",
                id,
                value.len()
            );
        }
    }
}

/// Errors raised by the IE builder and parser.
#[derive(Debug, Error)]
pub enum IeError {
    /// A declared element length overruns the remaining buffer.
    #[error("information element {ie} declares {declared} bytes with {remaining} remaining")]
    Truncated {
        /// Raw element id.
        ie: u8,
        /// Declared element length.
        declared: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// The outbound list would not fit in a datagram.
    #[error("information elements exceed the {max}-byte frame budget")]
    Overflow {
        /// Budget in bytes.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_builder_parse_roundtrip() {
        let mut list = IeList::new();
        list.append_str(IeId::CalledNumber, "600").unwrap();
        list.append_str(IeId::CallingName, "alice").unwrap();
        list.append_short(IeId::Version, 2).unwrap();
        list.append_int(IeId::Capability, 0x0E).unwrap();
        list.append_int(IeId::Format, 1 << 2).unwrap();
        list.append_flag(IeId::AutoAnswer).unwrap();
        list.append_int(IeId::TransferId, 0xCAFE_F00D).unwrap();

        let ies = Ies::parse(list.as_bytes()).unwrap();
        assert_eq!(ies.called_number.as_deref(), Some("600"));
        assert_eq!(ies.calling_name.as_deref(), Some("alice"));
        assert_eq!(ies.version, Some(2));
        assert_eq!(ies.capability, Some(0x0E));
        assert_eq!(ies.format, Some(1 << 2));
        assert!(ies.autoanswer);
        assert_eq!(ies.transferid, Some(0xCAFE_F00D));
        assert_eq!(ies.challenge, None);
    }

    #[test]
    fn test_apparent_addr_layout() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 9), 4569);
        let mut list = IeList::new();
        list.append_addr(IeId::ApparentAddr, addr).unwrap();

        let bytes = list.as_bytes();
        assert_eq!(bytes[0], IeId::ApparentAddr.as_byte());
        assert_eq!(bytes[1], 16);
        // Family 2 little-endian, then big-endian port and address.
        assert_eq!(&bytes[2..4], &[2, 0]);
        assert_eq!(&bytes[4..6], &4569u16.to_be_bytes());
        assert_eq!(&bytes[6..10], &[192, 168, 1, 9]);
        assert_eq!(&bytes[10..18], &[0u8; 8]);

        let ies = Ies::parse(bytes).unwrap();
        assert_eq!(ies.apparent_addr, Some(addr));
    }

    #[test]
    fn test_unknown_ie_skipped() {
        // Unknown id 200, then a known one.
        let mut raw = vec![200u8, 3, 1, 2, 3];
        raw.extend_from_slice(&[IeId::Refresh.as_byte(), 2, 0, 60]);
        let ies = Ies::parse(&raw).unwrap();
        assert_eq!(ies.refresh, Some(60));
    }

    #[test]
    fn test_wrong_length_numeric_skipped() {
        // Capability with 2 bytes instead of 4 is dropped, not fatal.
        let raw = [IeId::Capability.as_byte(), 2, 0, 1];
        let ies = Ies::parse(&raw).unwrap();
        assert_eq!(ies.capability, None);
    }

    #[test]
    fn test_truncated_stream_is_fatal() {
        let raw = [IeId::Cause.as_byte(), 10, b'x'];
        assert!(matches!(
            Ies::parse(&raw),
            Err(IeError::Truncated {
                declared: 10,
                remaining: 1,
                ..
            })
        ));
        // A dangling tag byte with no length is also fatal.
        assert!(matches!(
            Ies::parse(&[IeId::Cause.as_byte()]),
            Err(IeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_builder_overflow() {
        let mut list = IeList::new();
        let blob = vec![0u8; 200];
        let mut hit_overflow = false;
        for _ in 0..40 {
            if list.append_raw(IeId::Cause, &blob).is_err() {
                hit_overflow = true;
                break;
            }
        }
        assert!(hit_overflow);
    }
}
