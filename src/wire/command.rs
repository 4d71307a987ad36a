//! Subclass namespaces for the frame types that carry commands, plus the
//! media format bit registry.

/// Protocol version carried in the VERSION information element.
pub const PROTO_VERSION: u16 = 2;

/// Well-known UDP port.
pub const DEFAULT_PORT: u16 = 4569;

/// Commands carried by [`crate::wire::FrameType::Iax`] full frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IaxCommand {
    /// Initiate a new call.
    New = 1,
    /// Liveness probe on an established call.
    Ping = 2,
    /// Reply to PING or POKE, carries network quality elements.
    Pong = 3,
    /// Explicit acknowledgement.
    Ack = 4,
    /// Terminate a call.
    Hangup = 5,
    /// Refuse a call or an authentication.
    Reject = 6,
    /// Accept a call with a negotiated format.
    Accept = 7,
    /// Demand authentication.
    AuthReq = 8,
    /// Authentication response.
    AuthRep = 9,
    /// Peer does not know the call addressed.
    Inval = 10,
    /// Lag measurement request, echoed back through the jitter buffer.
    LagRq = 11,
    /// Lag measurement reply.
    LagRp = 12,
    /// Registration request.
    RegReq = 13,
    /// Registration authentication demand.
    RegAuth = 14,
    /// Registration granted.
    RegAck = 15,
    /// Registration refused.
    RegRej = 16,
    /// Registration release.
    RegRel = 17,
    /// Out-of-order notification; demands batch retransmission.
    Vnak = 18,
    /// Dialplan request.
    DpReq = 19,
    /// Dialplan reply.
    DpRep = 20,
    /// Dial a number on an accepted session.
    Dial = 21,
    /// Transfer request carrying the new peer's address.
    TxReq = 22,
    /// Transfer connectivity probe, sent on the candidate path.
    TxCnt = 23,
    /// Transfer connectivity confirmation.
    TxAcc = 24,
    /// Endpoint reports its transfer path is usable.
    TxReady = 25,
    /// Supervisor releases the call to the transfer target.
    TxRel = 26,
    /// Transfer abort.
    TxRej = 27,
    /// Stop sending media.
    Quelch = 28,
    /// Resume sending media.
    Unquelch = 29,
    /// Liveness probe outside any call.
    Poke = 30,
    /// Paging notification.
    Page = 31,
    /// Message waiting indication.
    Mwi = 32,
    /// Peer did not support a received command.
    Unsupport = 33,
    /// Request an unattended (blind) transfer to a number.
    Transfer = 34,
}

impl IaxCommand {
    /// Parse a command from its subclass value.
    pub fn from_subclass(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::New),
            2 => Some(Self::Ping),
            3 => Some(Self::Pong),
            4 => Some(Self::Ack),
            5 => Some(Self::Hangup),
            6 => Some(Self::Reject),
            7 => Some(Self::Accept),
            8 => Some(Self::AuthReq),
            9 => Some(Self::AuthRep),
            10 => Some(Self::Inval),
            11 => Some(Self::LagRq),
            12 => Some(Self::LagRp),
            13 => Some(Self::RegReq),
            14 => Some(Self::RegAuth),
            15 => Some(Self::RegAck),
            16 => Some(Self::RegRej),
            17 => Some(Self::RegRel),
            18 => Some(Self::Vnak),
            19 => Some(Self::DpReq),
            20 => Some(Self::DpRep),
            21 => Some(Self::Dial),
            22 => Some(Self::TxReq),
            23 => Some(Self::TxCnt),
            24 => Some(Self::TxAcc),
            25 => Some(Self::TxReady),
            26 => Some(Self::TxRel),
            27 => Some(Self::TxRej),
            28 => Some(Self::Quelch),
            29 => Some(Self::Unquelch),
            30 => Some(Self::Poke),
            31 => Some(Self::Page),
            32 => Some(Self::Mwi),
            33 => Some(Self::Unsupport),
            34 => Some(Self::Transfer),
            _ => None,
        }
    }

    /// Convert to the subclass value.
    pub fn as_subclass(self) -> u32 {
        self as u32
    }
}

/// Commands carried by [`crate::wire::FrameType::Control`] full frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlSubclass {
    /// Remote end hung up.
    Hangup = 1,
    /// Local ring indication.
    Ring = 2,
    /// Remote end is ringing.
    Ringing = 3,
    /// Remote end answered.
    Answer = 4,
    /// Remote end is busy.
    Busy = 5,
    /// Network congestion.
    Congestion = 8,
}

impl ControlSubclass {
    /// Parse a control subclass.
    pub fn from_subclass(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Hangup),
            2 => Some(Self::Ring),
            3 => Some(Self::Ringing),
            4 => Some(Self::Answer),
            5 => Some(Self::Busy),
            8 => Some(Self::Congestion),
            _ => None,
        }
    }

    /// Convert to the subclass value.
    pub fn as_subclass(self) -> u32 {
        self as u32
    }
}

/// Commands carried by [`crate::wire::FrameType::Html`] full frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HtmlSubclass {
    /// Send a URL to display.
    Url = 1,
    /// Raw HTML data.
    Data = 2,
    /// Load is complete.
    LoadComplete = 16,
    /// Peer does not support HTML frames.
    NoSupport = 17,
    /// Send a clickable URL.
    LinkUrl = 18,
    /// Refuse a link.
    LinkReject = 19,
    /// Tear a link down.
    Unlink = 20,
}

impl HtmlSubclass {
    /// Parse an HTML subclass.
    pub fn from_subclass(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Url),
            2 => Some(Self::Data),
            16 => Some(Self::LoadComplete),
            17 => Some(Self::NoSupport),
            18 => Some(Self::LinkUrl),
            19 => Some(Self::LinkReject),
            20 => Some(Self::Unlink),
            _ => None,
        }
    }

    /// Convert to the subclass value.
    pub fn as_subclass(self) -> u32 {
        self as u32
    }
}

/// Media format bits, used in subclasses of voice/video/image frames and in
/// the capability and format information elements.
pub mod format {
    /// G.723.1 audio.
    pub const G723_1: u32 = 1 << 0;
    /// GSM full rate audio.
    pub const GSM: u32 = 1 << 1;
    /// G.711 mu-law audio.
    pub const ULAW: u32 = 1 << 2;
    /// G.711 a-law audio.
    pub const ALAW: u32 = 1 << 3;
    /// G.726 ADPCM audio.
    pub const G726: u32 = 1 << 4;
    /// IMA ADPCM audio.
    pub const ADPCM: u32 = 1 << 5;
    /// 16-bit signed linear audio.
    pub const SLINEAR: u32 = 1 << 6;
    /// LPC-10 audio.
    pub const LPC10: u32 = 1 << 7;
    /// G.729a audio.
    pub const G729A: u32 = 1 << 8;
    /// Speex audio.
    pub const SPEEX: u32 = 1 << 9;
    /// iLBC audio.
    pub const ILBC: u32 = 1 << 10;
    /// JPEG still image.
    pub const JPEG: u32 = 1 << 16;
    /// PNG still image.
    pub const PNG: u32 = 1 << 17;
    /// H.261 video.
    pub const H261: u32 = 1 << 18;
    /// H.263 video.
    pub const H263: u32 = 1 << 19;

    /// All audio format bits.
    pub const AUDIO_MASK: u32 = 0xFFFF;
    /// All video format bits.
    pub const VIDEO_MASK: u32 = H261 | H263;

    /// Codec preference letter for a single format bit.
    ///
    /// Letters start at 'B' for bit zero; 'A' is reserved as "no codec".
    pub fn pref_char(format: u32) -> Option<char> {
        if format.is_power_of_two() {
            char::from_u32('A' as u32 + format.trailing_zeros() + 1)
        } else {
            None
        }
    }

    /// Format bit for a codec preference letter.
    pub fn pref_format(c: char) -> Option<u32> {
        let idx = (c as u32).checked_sub('A' as u32 + 1)?;
        if idx < 32 { Some(1u32 << idx) } else { None }
    }
}

/// Authentication method bits in the AUTHMETHODS information element.
pub mod auth {
    /// Cleartext password.
    pub const PLAINTEXT: u16 = 1 << 0;
    /// MD5 digest of challenge plus secret.
    pub const MD5: u16 = 1 << 1;
    /// RSA signature.
    pub const RSA: u16 = 1 << 2;
}

/// Dialplan status bits in the DPSTATUS information element.
pub mod dpstatus {
    /// The number exists.
    pub const EXISTS: u16 = 1 << 0;
    /// The number could exist with more digits.
    pub const CAN_EXIST: u16 = 1 << 1;
    /// The number cannot exist.
    pub const NON_EXISTENT: u16 = 1 << 2;
    /// The number matches an ignore pattern.
    pub const IGNORE_PATTERN: u16 = 1 << 14;
    /// Longer numbers would also match.
    pub const MATCH_MORE: u16 = 1 << 15;
}
