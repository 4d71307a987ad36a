//! Wire codec: frame headers, subclass namespaces and information elements.
//!
//! Everything in this module is a pure transformation between byte slices
//! and typed values; no session state is touched here.

pub mod command;
pub mod frame;
pub mod ies;

pub use command::{ControlSubclass, HtmlSubclass, IaxCommand};
pub use frame::{Datagram, FrameError, FrameType, FullHeader, MiniHeader, VideoHeader};
pub use ies::{IeError, IeId, IeList, Ies};
