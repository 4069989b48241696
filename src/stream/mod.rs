//! Streaming session modules.
//!
//! - `session`: subscribe/unsubscribe state machine owning the loops.
//! - `transport`: connection seam with websocket and in-memory transports.
//! - `proto`: packet kinds and payloads, decoded in two phases.
//! - `queue`: ordered hand-off between the listener and the dispatcher.
//! - `dispatcher`: routes packets to the handler on an execution context.
//! - `context`: execution contexts handler calls are marshaled onto.

/// Session configuration and tuning options.
pub mod config;
/// Execution contexts for handler calls.
pub mod context;
/// Packet routing loop.
pub mod dispatcher;
/// Consumer callback trait.
pub mod handler;
mod listener;
/// Packet protocol types.
pub mod proto;
/// Listener to dispatcher packet queue.
pub mod queue;
/// Session lifecycle and builder.
pub mod session;
/// Transport trait and implementations.
pub mod transport;
