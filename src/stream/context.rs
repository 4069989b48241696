//! Execution contexts that handler calls are marshaled onto.
//!
//! The dispatcher never calls the handler directly. It hands a job to an
//! [`ExecutionContext`] and waits until the job has run there, which keeps
//! handler calls sequential and in queue order even when the context is a
//! different thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Unit of work executed on a context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("execution context has shut down")]
    Closed,

    #[error("job panicked on the execution context")]
    Panicked,
}

/// Runs jobs on a designated execution context.
#[async_trait]
pub trait ExecutionContext: Send + Sync + 'static {
    /// Executes `job` on the context and resolves once it has finished.
    async fn run(&self, job: Job) -> Result<(), ContextError>;
}

/// Runs jobs on the caller's task.
///
/// Suitable for handlers without thread affinity.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineContext;

#[async_trait]
impl ExecutionContext for InlineContext {
    async fn run(&self, job: Job) -> Result<(), ContextError> {
        catch_unwind(AssertUnwindSafe(job)).map_err(|_| ContextError::Panicked)
    }
}

struct Envelope {
    job: Job,
    done: oneshot::Sender<Result<(), ContextError>>,
}

/// A single named OS thread that drains jobs one at a time, the way a UI
/// event loop would.
pub struct DedicatedThreadContext {
    tx: Mutex<Option<std_mpsc::Sender<Envelope>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl DedicatedThreadContext {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<Envelope>();
        let thread = thread::Builder::new().name(name.into()).spawn(move || {
            for envelope in rx {
                let outcome =
                    catch_unwind(AssertUnwindSafe(envelope.job)).map_err(|_| ContextError::Panicked);
                let _ = envelope.done.send(outcome);
            }
        })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Id of the context thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// True when called from the context thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops accepting jobs and joins the thread after it drains queued ones.
    ///
    /// Must not be called from the context thread itself.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                debug!(event = "context_thread_panicked");
            }
        }
    }
}

#[async_trait]
impl ExecutionContext for DedicatedThreadContext {
    async fn run(&self, job: Job) -> Result<(), ContextError> {
        let (done, finished) = oneshot::channel();
        {
            let tx = self.tx.lock();
            let tx = tx.as_ref().ok_or(ContextError::Closed)?;
            tx.send(Envelope { job, done })
                .map_err(|_| ContextError::Closed)?;
        }
        finished.await.map_err(|_| ContextError::Closed)?
    }
}

impl Drop for DedicatedThreadContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
