//! # IAX2 Protocol Engine
//!
//! A peer-to-peer call signaling and media framing engine speaking the IAX2
//! wire protocol over a single UDP port. It provides:
//!
//! - **Signaling**: call setup, answer, hangup, registration, dialplan
//!   queries, DTMF, text, URLs and images on one reliable in-band channel
//! - **Media framing**: full and mini voice/video frames with compressed
//!   timestamps and automatic format renegotiation
//! - **Reliability**: sequence windows, retransmission with exponential
//!   backoff, duplicate suppression and VNAK recovery, all over plain UDP
//! - **Transfers**: supervised three-party transfers that take the middle
//!   hop out of the media path
//!
//! The engine is single-threaded and transport-agnostic: the application
//! drives it through [`Engine::get_event`] and owns the clock, the socket
//! (via the [`transport::Transport`] trait) and the playout policy (via the
//! [`jitter::JitterBuffer`] trait).
//!
//! ## Modules
//!
//! - [`wire`]: frame headers, commands and information elements
//! - [`engine`]: sessions, sequencing, timing, scheduling, the event loop
//! - [`jitter`]: the playout buffer seam
//! - [`transport`]: the datagram seam and a UDP implementation
//!
//! ## Example
//!
//! ```no_run
//! use iax2_protocol::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let transport = UdpTransport::bind("0.0.0.0:4569")?;
//!     let mut engine = Engine::new(
//!         transport,
//!         EngineConfig::default(),
//!         Box::new(|| Box::new(PassthroughJitterBuffer::new())),
//!     );
//!     let call = engine.call("pbx.example.com/600", Some("500"), Some("Alice"),
//!         1 << 2, 0xFFFF)?;
//!     loop {
//!         if let Some(event) = engine.get_event(true)? {
//!             match event.kind {
//!                 EventKind::Accept { format } => println!("accepted: 0x{format:x}"),
//!                 EventKind::Answer => engine.send_dtmf(call, '1')?,
//!                 EventKind::Hangup { .. } => break,
//!                 _ => {}
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod engine;
pub mod error;
pub mod jitter;
pub mod transport;
pub mod wire;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::engine::{
        CallNumber, CallRequest, Engine, EngineConfig, Event, EventKind, UrlKind,
    };
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::jitter::{JitterBuffer, NetStats, PassthroughJitterBuffer};
    pub use crate::transport::{Transport, UdpTransport};
    pub use crate::wire::command::{format, IaxCommand};
}

pub use engine::{CallNumber, Engine, EngineConfig, Event, EventKind};
pub use error::{EngineError, EngineResult};
pub use jitter::{JitterBuffer, PassthroughJitterBuffer};
pub use transport::{Transport, UdpTransport};
