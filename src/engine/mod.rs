//! The protocol engine: sessions, sequencing, timing, scheduling and the
//! event loop that ties them to a transport.

mod dispatch;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod event;
pub mod registry;
pub mod samples;
pub mod sched;
pub mod seq;
pub mod session;
pub mod timing;

pub use engine::{Engine, EngineConfig, JitterBufferFactory};
pub use event::{CallRequest, Event, EventKind, UrlKind};
pub use session::{CallNumber, TransferState};
