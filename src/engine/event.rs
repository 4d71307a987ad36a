//! Application-visible events.

use std::net::SocketAddrV4;

use crate::engine::session::CallNumber;
use crate::jitter::NetStats;
use crate::wire::command::HtmlSubclass;

/// One event delivered by the engine, tagged with the session it belongs to.
#[derive(Debug)]
pub struct Event {
    /// Local call number of the session the event concerns.
    pub call: CallNumber,
    /// What happened.
    pub kind: EventKind,
}

/// Caller-supplied fields of an inbound call request.
#[derive(Debug, Default, Clone)]
pub struct CallRequest {
    /// Number or extension being called.
    pub called_number: Option<String>,
    /// Context for the called number.
    pub called_context: Option<String>,
    /// Calling number.
    pub calling_number: Option<String>,
    /// Calling name.
    pub calling_name: Option<String>,
    /// Username offered for authentication.
    pub username: Option<String>,
    /// Caller's language.
    pub language: Option<String>,
    /// Desired format bit.
    pub format: Option<u32>,
    /// Caller's codec capability mask.
    pub capability: Option<u32>,
    /// Caller's codec preference letters.
    pub codec_prefs: Option<String>,
}

/// Flavor of a received URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// Display this URL.
    Display,
    /// Clickable link.
    Link,
}

/// What the engine observed.
///
/// The `Ping`, `Poke` and `LagRequest` variants never reach the
/// application; the poll loop answers them itself.
#[derive(Debug)]
pub enum EventKind {
    /// An inbound call request.
    Connect(CallRequest),
    /// The peer accepted our call with the given format.
    Accept {
        /// Negotiated format bit.
        format: u32,
    },
    /// The peer answered.
    Answer,
    /// The peer is ringing.
    Ringing,
    /// The peer is busy or congested.
    Busy,
    /// The call ended; the session is destroyed on delivery.
    Hangup {
        /// Optional cause text.
        cause: Option<String>,
    },
    /// The peer refused the call; the session is destroyed on delivery.
    Reject {
        /// Optional cause text.
        cause: Option<String>,
    },
    /// A voice frame. Empty data marks an interpolation frame synthesized
    /// for a loss.
    Voice {
        /// Format bit.
        format: u32,
        /// Unwrapped 32-bit media timestamp.
        timestamp: u32,
        /// Codec payload.
        data: Vec<u8>,
    },
    /// A comfort noise frame.
    Cng {
        /// Noise level.
        level: u32,
        /// Optional codec payload.
        data: Vec<u8>,
    },
    /// A video frame.
    Video {
        /// Format bit.
        format: u32,
        /// Unwrapped 32-bit media timestamp.
        timestamp: u32,
        /// Whether this starts a key frame.
        key_frame: bool,
        /// Codec payload.
        data: Vec<u8>,
    },
    /// A DTMF digit.
    Dtmf {
        /// ASCII digit.
        digit: u8,
    },
    /// A text message.
    Text {
        /// Message body.
        text: String,
    },
    /// A still image.
    Image {
        /// Format bit.
        format: u32,
        /// Image payload.
        data: Vec<u8>,
    },
    /// A URL to display or link.
    Url {
        /// Display or link.
        kind: UrlKind,
        /// The URL text.
        url: String,
    },
    /// Raw HTML payload the engine does not interpret.
    Html {
        /// HTML subclass.
        kind: HtmlSubclass,
        /// Payload bytes.
        data: Vec<u8>,
    },
    /// HTML load completed.
    LoadComplete,
    /// HTML link torn down.
    Unlink,
    /// HTML link refused.
    LinkReject,
    /// The peer demands authentication and no stored secret could answer.
    AuthRequest {
        /// Offered method bits.
        methods: u16,
        /// MD5 challenge, when offered.
        challenge: Option<String>,
        /// Username the peer expects.
        username: Option<String>,
    },
    /// Registration accepted.
    RegAck {
        /// Granted refresh period, seconds.
        refresh: Option<u16>,
        /// Address the registrar saw us at.
        apparent_addr: Option<SocketAddrV4>,
        /// Messages waiting.
        msgcount: Option<u16>,
    },
    /// Registration refused.
    RegRej {
        /// Optional cause text.
        cause: Option<String>,
    },
    /// Dialplan reply.
    DialplanReply {
        /// The number asked about.
        number: Option<String>,
        /// Status bits (see [`crate::wire::command::dpstatus`]).
        status: u16,
    },
    /// Reply to a lag request.
    LagReply {
        /// Round trip through both jitter buffers, milliseconds.
        delay_ms: u32,
    },
    /// The peer answered a ping; carries its view of the link.
    Pong {
        /// Peer-reported quality counters.
        stats: NetStats,
    },
    /// The peer asked us to stop sending media.
    Quelch {
        /// Whether hold music was requested.
        musiconhold: bool,
    },
    /// The peer asked us to resume sending media.
    Unquelch,
    /// This session moved to a new peer (transfer completed here).
    Transferred,
    /// Both transfer endpoints confirmed; the supervisor released the call.
    TransferReady,
    /// A transfer attempt was abandoned.
    TransferRejected,
    /// A reliable frame ran out of retries; the application should hang up.
    Timeout,
    /// Internal: liveness probe to answer.
    Ping {
        /// Timestamp to echo.
        timestamp: u32,
    },
    /// Internal: out-of-call probe to answer and forget.
    Poke {
        /// Timestamp to echo.
        timestamp: u32,
    },
    /// Internal: lag probe that rode the jitter buffer.
    LagRequest {
        /// Timestamp to echo.
        timestamp: u32,
    },
}
