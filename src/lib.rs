//! Client-side monitor for algorithm execution event streams.
//!
//! The crate is organized by concern:
//! - `stream`: session lifecycle, transports, packet protocol, and the
//!   listener/dispatcher loops that feed a [`stream::handler::SessionHandler`].
//! - `result`: display model produced from live and backtest result packets.
//! - `retry`: bounded connect retries.

/// Result display model and converters.
pub mod result;
/// Connect retry helpers.
pub mod retry;
/// Streaming session, transports, and protocol types.
pub mod stream;

pub use result::{DefaultResultConverter, ResultConverter, ResultSnapshot};
pub use stream::config::{StreamSessionOptions, StreamSessionParameters};
pub use stream::handler::{LogItemKind, ResultContext, SessionHandler, SessionState};
pub use stream::session::{Session, SessionBuilder, SessionError, StreamSession};
