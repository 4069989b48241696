//! Consumer callbacks invoked by a session.

use chrono::{DateTime, Utc};

use crate::result::ResultSnapshot;
use crate::stream::proto::{AlgorithmStatusPacket, LiveNodePacket, OrderEventPacket};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Unsubscribed,
    Subscribed,
}

/// Severity tag attached to delivered log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogItemKind {
    Log,
    Debug,
    Error,
}

/// Converted result delivered to [`SessionHandler::handle_result`].
#[derive(Clone, Debug, PartialEq)]
pub struct ResultContext {
    /// Session name, `host:port`.
    pub name: String,
    pub result: ResultSnapshot,
    /// Backtest completion fraction in `[0, 1]`; `None` for live results.
    pub progress: Option<f64>,
}

/// Receives packets delivered by a session.
///
/// Packet callbacks run on the session's execution context, one at a time
/// and in arrival order. `handle_state_changed` runs on the thread that
/// changed the state.
pub trait SessionHandler: Send + Sync + 'static {
    fn handle_algorithm_status(&self, packet: AlgorithmStatusPacket);

    fn handle_live_node(&self, packet: LiveNodePacket);

    fn handle_result(&self, context: ResultContext);

    fn handle_log_message(&self, timestamp: DateTime<Utc>, message: String, kind: LogItemKind);

    fn handle_order_event(&self, packet: OrderEventPacket);

    fn handle_state_changed(&self, state: SessionState);
}
