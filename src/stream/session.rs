//! Session lifecycle: owns the listener and dispatcher loops of the active
//! subscription.
//!
//! `subscribe` starts both loops with a fresh cancellation token and queue;
//! `unsubscribe` fires the token and releases the queue without waiting for
//! the loops to wind down. Loops that are still finishing a receive observe
//! the token within one receive interval.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::result::{DefaultResultConverter, ResultConverter};
use crate::retry::RetryPolicy;
use crate::stream::config::{StreamSessionConfig, StreamSessionOptions, StreamSessionParameters};
use crate::stream::context::{ExecutionContext, InlineContext};
use crate::stream::dispatcher::{CompletionHook, DeliveryGate, Dispatcher};
use crate::stream::handler::{SessionHandler, SessionState};
use crate::stream::listener::Listener;
use crate::stream::queue::PacketQueue;
use crate::stream::transport::{Endpoint, Transport, WsTransport};

/// Errors returned by session construction and lifecycle calls.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Port is not an integer in `1..=65535`.
    #[error("invalid port {0:?}: expected an integer between 1 and 65535")]
    InvalidPort(String),

    /// Host is empty.
    #[error("host must not be empty")]
    InvalidHost,

    /// Built outside a tokio runtime without an explicit handle.
    #[error("no tokio runtime available to run the session loops")]
    NoRuntime,

    /// Session was shut down.
    #[error("session has been shut down")]
    Disposed,
}

/// Session over the websocket transport.
pub type StreamSession = Session<WsTransport>;

/// Resources of one active subscription.
struct Subscription {
    cancel: CancellationToken,
    queue: Arc<PacketQueue>,
}

impl Subscription {
    fn stop(self) {
        self.cancel.cancel();
        self.queue.release();
    }
}

enum Lifecycle {
    Unsubscribed,
    Subscribed(Subscription),
    Disposed,
}

struct SessionCore<T: Transport> {
    transport: Arc<T>,
    config: StreamSessionConfig,
    options: StreamSessionOptions,
    name: String,
    handler: Arc<dyn SessionHandler>,
    converter: Arc<dyn ResultConverter>,
    context: Arc<dyn ExecutionContext>,
    runtime: Handle,
    lifecycle: Mutex<Lifecycle>,
    /// Held from a state change until its notification returned, so
    /// notifications arrive in transition order. Reentrant so a handler may
    /// change the state from inside `handle_state_changed`.
    transitions: ReentrantMutex<()>,
    delivery: DeliveryGate,
}

impl<T: Transport> SessionCore<T> {
    fn subscribe(self: &Arc<Self>) -> Result<(), SessionError> {
        let _transition = self.transitions.lock();
        {
            let mut lifecycle = self.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Disposed => return Err(SessionError::Disposed),
                Lifecycle::Subscribed(_) => {
                    info!(event = "session_already_subscribed", session = %self.name);
                    return Ok(());
                }
                Lifecycle::Unsubscribed => {}
            }
            *lifecycle = Lifecycle::Subscribed(self.start());
        }

        info!(event = "session_subscribed", session = %self.name);
        self.handler.handle_state_changed(SessionState::Subscribed);
        Ok(())
    }

    fn start(self: &Arc<Self>) -> Subscription {
        let cancel = CancellationToken::new();
        let queue = Arc::new(PacketQueue::new());

        let listener = Listener {
            transport: Arc::clone(&self.transport),
            endpoint: self.config.endpoint.clone(),
            queue: Arc::clone(&queue),
            cancel: cancel.clone(),
            receive_timeout: self.options.receive_timeout,
            connect_retry: self.options.connect_retry.clone(),
        };

        let on_completed = self.config.close_after_completed.then(|| {
            let core: Weak<Self> = Arc::downgrade(self);
            let hook: CompletionHook = Arc::new(move || {
                if let Some(core) = core.upgrade() {
                    core.unsubscribe();
                }
            });
            hook
        });
        let dispatcher = Dispatcher {
            queue: Arc::clone(&queue),
            cancel: cancel.clone(),
            handler: Arc::clone(&self.handler),
            converter: Arc::clone(&self.converter),
            context: Arc::clone(&self.context),
            name: self.name.clone(),
            on_completed,
            gate: Arc::clone(&self.delivery),
        };

        self.runtime.spawn(listener.run());
        self.runtime.spawn(dispatcher.run());
        Subscription { cancel, queue }
    }

    fn unsubscribe(&self) {
        let _transition = self.transitions.lock();
        let Some(subscription) = self.take_subscription(Lifecycle::Unsubscribed) else {
            info!(event = "session_not_subscribed", session = %self.name);
            return;
        };
        subscription.stop();

        info!(event = "session_unsubscribed", session = %self.name);
        self.handler.handle_state_changed(SessionState::Unsubscribed);
    }

    /// Moves the lifecycle to `next` if a subscription is active, or if
    /// `next` is terminal, and returns the subscription that was active.
    fn take_subscription(&self, next: Lifecycle) -> Option<Subscription> {
        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Disposed) {
            Lifecycle::Subscribed(subscription) => {
                *lifecycle = next;
                Some(subscription)
            }
            Lifecycle::Unsubscribed if matches!(next, Lifecycle::Disposed) => None,
            previous => {
                *lifecycle = previous;
                None
            }
        }
    }

    fn shutdown(&self, notify: bool) {
        let _transition = self.transitions.lock();
        let subscription = self.take_subscription(Lifecycle::Disposed);
        let Some(subscription) = subscription else {
            return;
        };
        subscription.stop();

        info!(event = "session_shut_down", session = %self.name);
        if notify {
            self.handler.handle_state_changed(SessionState::Unsubscribed);
        }
    }

    fn state(&self) -> SessionState {
        match &*self.lifecycle.lock() {
            Lifecycle::Subscribed(_) => SessionState::Subscribed,
            Lifecycle::Unsubscribed | Lifecycle::Disposed => SessionState::Unsubscribed,
        }
    }
}

/// A monitoring session bound to one producer endpoint.
///
/// Handler callbacks are delivered on the configured execution context;
/// state notifications run on whichever thread changed the state.
pub struct Session<T: Transport> {
    core: Arc<SessionCore<T>>,
}

impl StreamSession {
    /// Builds a websocket session with default options, on the current
    /// tokio runtime.
    pub fn new(
        parameters: StreamSessionParameters,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Self, SessionError> {
        SessionBuilder::new(parameters)?.build(WsTransport::new(), handler)
    }
}

impl<T: Transport> Session<T> {
    /// Starts the listener and dispatcher loops.
    ///
    /// Subscribing while already subscribed is a no-op and does not notify
    /// the handler again.
    pub fn subscribe(&self) -> Result<(), SessionError> {
        self.core.subscribe()
    }

    /// Stops the active subscription. A no-op when not subscribed.
    pub fn unsubscribe(&self) {
        self.core.unsubscribe();
    }

    /// Unsubscribes and rejects further subscriptions.
    pub fn shutdown(&self) {
        self.core.shutdown(true);
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state() == SessionState::Subscribed
    }

    /// `host:port` of the producer.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.core.config.endpoint
    }

    pub fn config(&self) -> &StreamSessionConfig {
        &self.core.config
    }

    /// Packets received but not yet delivered; zero when not subscribed.
    pub fn backlog(&self) -> usize {
        match &*self.core.lifecycle.lock() {
            Lifecycle::Subscribed(subscription) => subscription.queue.len(),
            Lifecycle::Unsubscribed | Lifecycle::Disposed => 0,
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.core.shutdown(false);
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: StreamSessionConfig,
    options: StreamSessionOptions,
    context: Arc<dyn ExecutionContext>,
    converter: Arc<dyn ResultConverter>,
    runtime: Option<Handle>,
}

impl SessionBuilder {
    /// Validates `parameters`; fails with [`SessionError::InvalidPort`] when
    /// the port is not usable.
    pub fn new(parameters: StreamSessionParameters) -> Result<Self, SessionError> {
        Ok(Self::from_config(StreamSessionConfig::try_from(parameters)?))
    }

    pub fn from_config(config: StreamSessionConfig) -> Self {
        Self {
            config,
            options: StreamSessionOptions::default(),
            context: Arc::new(InlineContext),
            converter: Arc::new(DefaultResultConverter),
            runtime: None,
        }
    }

    /// Execution context handler calls are marshaled onto.
    pub fn with_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = context;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn ResultConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_options(mut self, options: StreamSessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.options.receive_timeout = receive_timeout;
        self
    }

    pub fn with_connect_retry(mut self, connect_retry: RetryPolicy) -> Self {
        self.options.connect_retry = connect_retry;
        self
    }

    /// Runtime the loops are spawned on; defaults to the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build<T: Transport>(
        self,
        transport: T,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Session<T>, SessionError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| SessionError::NoRuntime)?,
        };

        Ok(Session {
            core: Arc::new(SessionCore {
                transport: Arc::new(transport),
                name: self.config.endpoint.to_string(),
                config: self.config,
                options: self.options,
                handler,
                converter: self.converter,
                context: self.context,
                runtime,
                lifecycle: Mutex::new(Lifecycle::Unsubscribed),
                transitions: ReentrantMutex::new(()),
                delivery: DeliveryGate::default(),
            }),
        })
    }
}
