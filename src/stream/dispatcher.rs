//! Consumer-side loop: takes packets in order and delivers them to the
//! handler on the execution context.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::result::ResultConverter;
use crate::stream::context::ExecutionContext;
use crate::stream::handler::{LogItemKind, ResultContext, SessionHandler};
use crate::stream::proto::Packet;
use crate::stream::queue::{PacketQueue, Take};

/// Tolerance used when checking whether a backtest reported completion.
pub const COMPLETED_EPSILON: f64 = 1e-9;

/// Invoked on the execution context once a completed backtest was delivered
/// and the session is configured to close after completion.
pub(crate) type CompletionHook = Arc<dyn Fn() + Send + Sync>;

/// Held across every handler job. Shared by all dispatchers of one session so
/// a new subscription waits for a job the previous one already started.
pub(crate) type DeliveryGate = Arc<Mutex<()>>;

pub(crate) struct Dispatcher {
    pub(crate) queue: Arc<PacketQueue>,
    pub(crate) cancel: CancellationToken,
    pub(crate) handler: Arc<dyn SessionHandler>,
    pub(crate) converter: Arc<dyn ResultConverter>,
    pub(crate) context: Arc<dyn ExecutionContext>,
    pub(crate) name: String,
    pub(crate) on_completed: Option<CompletionHook>,
    pub(crate) gate: DeliveryGate,
}

impl Dispatcher {
    pub(crate) async fn run(self) {
        loop {
            let packet = match self.queue.take(&self.cancel).await {
                Take::Packet(packet) => packet,
                Take::Cancelled => break,
                Take::Closed => {
                    debug!(event = "dispatcher_queue_closed", session = %self.name);
                    break;
                }
            };
            self.route(packet).await;
        }
        debug!(
            event = "dispatcher_stopped",
            session = %self.name,
            backlog = self.queue.len()
        );
    }

    async fn route(&self, packet: Packet) {
        match packet {
            Packet::AlgorithmStatus(packet) => {
                self.deliver(move |handler| handler.handle_algorithm_status(packet))
                    .await;
            }
            Packet::LiveNode(packet) => {
                self.deliver(move |handler| handler.handle_live_node(packet))
                    .await;
            }
            Packet::AlgorithmNode(packet) => {
                trace!(
                    event = "dispatcher_algorithm_node_ignored",
                    algorithm_id = %packet.algorithm_id
                );
            }
            Packet::LiveResult(packet) => {
                let context = ResultContext {
                    name: self.name.clone(),
                    result: self.converter.from_live_result(packet.results),
                    progress: None,
                };
                self.deliver(move |handler| handler.handle_result(context))
                    .await;
            }
            Packet::BacktestResult(packet) => {
                let progress = packet.progress;
                let context = ResultContext {
                    name: self.name.clone(),
                    result: self.converter.from_backtest_result(packet.results),
                    progress: Some(progress),
                };
                self.deliver(move |handler| handler.handle_result(context))
                    .await;

                if is_completed(progress) {
                    self.complete().await;
                }
            }
            Packet::Log(packet) => self.log(packet.message, LogItemKind::Log).await,
            Packet::Debug(packet) => self.log(packet.message, LogItemKind::Debug).await,
            Packet::HandledError(packet) => self.log(packet.message, LogItemKind::Error).await,
            Packet::RuntimeError(packet) => self.log(packet.message, LogItemKind::Error).await,
            Packet::SystemDebug(packet) => self.log(packet.message, LogItemKind::Debug).await,
            Packet::OrderEvent(packet) => {
                self.deliver(move |handler| handler.handle_order_event(packet))
                    .await;
            }
        }
    }

    async fn log(&self, message: String, kind: LogItemKind) {
        let timestamp = Utc::now();
        self.deliver(move |handler| handler.handle_log_message(timestamp, message, kind))
            .await;
    }

    /// Runs one handler call on the execution context and waits for it.
    ///
    /// The job re-checks cancellation on the context, so nothing reaches the
    /// handler once an unsubscribe has run there.
    async fn deliver<F>(&self, call: F)
    where
        F: FnOnce(&dyn SessionHandler) + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let cancel = self.cancel.clone();
        let job = Box::new(move || {
            if cancel.is_cancelled() {
                return;
            }
            call(handler.as_ref());
        });

        let _turn = self.gate.lock().await;
        if let Err(error) = self.context.run(job).await {
            warn!(
                event = "dispatcher_delivery_failed",
                session = %self.name,
                error = %error
            );
        }
    }

    async fn complete(&self) {
        let Some(on_completed) = self.on_completed.clone() else {
            return;
        };
        info!(event = "backtest_completed_closing", session = %self.name);

        let cancel = self.cancel.clone();
        let job = Box::new(move || {
            if !cancel.is_cancelled() {
                on_completed();
            }
        });
        let _turn = self.gate.lock().await;
        if let Err(error) = self.context.run(job).await {
            warn!(
                event = "dispatcher_delivery_failed",
                session = %self.name,
                error = %error
            );
        }
    }
}

/// True when a backtest progress value reports completion.
pub fn is_completed(progress: f64) -> bool {
    progress >= 1.0 - COMPLETED_EPSILON
}
