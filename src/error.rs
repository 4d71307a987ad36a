//! Crate-wide error types.

use thiserror::Error;

use crate::engine::session::CallNumber;
use crate::wire::frame::FrameError;
use crate::wire::ies::IeError;

/// Errors surfaced by the engine's public API.
///
/// Malformed *inbound* traffic is never an error: bad datagrams are logged
/// and dropped so one misbehaving peer cannot take the engine down. These
/// variants cover local misuse and transport failures only.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The underlying transport failed to send or receive.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// An outbound frame could not be encoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// An outbound information-element list could not be built.
    #[error(transparent)]
    Ie(#[from] IeError),

    /// The call number does not name a live session.
    #[error("no session for call number {0}")]
    UnknownSession(CallNumber),

    /// All 32767 call numbers are occupied.
    #[error("all call numbers are in use")]
    CallNumbersExhausted,

    /// A destination handle failed to parse.
    #[error("invalid destination handle {0:?}")]
    BadHandle(String),

    /// A destination hostname did not resolve to any address.
    #[error("could not resolve {0:?}")]
    Resolve(String),

    /// Call transfer carries IPv4 socket addresses on the wire.
    #[error("transfer requires IPv4 peer addresses")]
    Ipv4Required,

    /// A transfer-path send was attempted before a transfer target exists.
    #[error("no transfer target on call {0}")]
    NoTransferTarget(CallNumber),

    /// The derived media timestamp came out as zero, which the wire format
    /// reserves.
    #[error("derived timestamp is zero")]
    ZeroTimestamp,
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
