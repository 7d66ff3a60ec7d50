//! The sequential dispatcher: a single FIFO queue drained by a single
//! dedicated worker task.
//!
//! `submit` never blocks the caller; the worker blocks when the queue is
//! empty. Ordering is total: the queue is the one synchronization point,
//! so execution order equals arrival order at the queue, and no two
//! handler invocations ever overlap.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::handler::Handler;

/// One unit of submitted work, carried through the queue to the handler.
/// The token correlates the submission with its completion notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem<T> {
    pub payload: T,
    pub token: u64,
}

/// Outward signals from the dispatcher to its integrator.
#[derive(Debug)]
pub enum Notice {
    /// The item's handler returned successfully. Fired exactly once per
    /// item, after the handler returns, before the next item starts.
    Completed { token: u64 },
    /// The item's handler returned an error. The worker is gone; nothing
    /// queued behind this item will run.
    Faulted { token: u64, error: anyhow::Error },
}

/// `Created → Started → Stopped`, one direction only. Stopped is terminal:
/// a stopped dispatcher is rebuilt, never resurrected.
enum State<T> {
    Created,
    Started {
        queue: UnboundedSender<WorkItem<T>>,
        worker: JoinHandle<()>,
    },
    Stopped,
}

/// Accepts work from any number of callers and executes it one item at a
/// time, in submission order, on a dedicated worker task.
pub struct Dispatcher<T> {
    name: String,
    handler: Arc<dyn Handler<T>>,
    notices: UnboundedSender<Notice>,
    state: Mutex<State<T>>,
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Build a dispatcher around a handler. The returned receiver yields a
    /// [`Notice`] per handled item so the caller can apply its own
    /// shutdown policy.
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn Handler<T>>,
    ) -> (Self, UnboundedReceiver<Notice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                handler,
                notices,
                state: Mutex::new(State::Created),
            },
            notice_rx,
        )
    }

    /// Create the worker task and its queue. Idempotent while started.
    /// Fails if there is no runtime to host the worker, or if the
    /// dispatcher was already stopped.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match &*state {
            State::Started { .. } => Ok(()),
            State::Stopped => {
                bail!("dispatcher [{}] is stopped; build a new one", self.name)
            }
            State::Created => {
                let runtime = tokio::runtime::Handle::try_current().with_context(|| {
                    format!("dispatcher [{}]: no runtime to host the worker", self.name)
                })?;
                let (queue, queue_rx) = mpsc::unbounded_channel();
                let worker = runtime.spawn(run_worker(
                    queue_rx,
                    Arc::clone(&self.handler),
                    self.notices.clone(),
                    self.name.clone(),
                ));
                *state = State::Started { queue, worker };
                tracing::info!(dispatcher = %self.name, "worker started");
                Ok(())
            }
        }
    }

    /// Enqueue an item. Returns as soon as the item is in the queue,
    /// regardless of queue depth or how slow the handler is. Errors if the
    /// dispatcher was never started, was stopped, or the worker died from
    /// a handler fault.
    pub fn submit(&self, payload: T, token: u64) -> Result<()> {
        let state = self.state.lock().unwrap();
        match &*state {
            State::Created => bail!("dispatcher [{}] not started", self.name),
            State::Stopped => bail!("dispatcher [{}] is stopped", self.name),
            State::Started { queue, .. } => {
                tracing::trace!(dispatcher = %self.name, token, "submit");
                queue.send(WorkItem { payload, token }).map_err(|_| {
                    anyhow::anyhow!("dispatcher [{}]: worker is gone", self.name)
                })
            }
        }
    }

    /// Tear the worker down. Queued-but-unstarted items are discarded and
    /// never execute; an in-flight handler is aborted at its next await
    /// point. Idempotent, and a no-op on a dispatcher that was never
    /// started.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        match &*state {
            State::Created | State::Stopped => {}
            State::Started { .. } => {
                if let State::Started { worker, .. } =
                    std::mem::replace(&mut *state, State::Stopped)
                {
                    worker.abort();
                    tracing::info!(dispatcher = %self.name, "stopped; queued items discarded");
                }
            }
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Started { .. })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The worker loop. Strict FIFO consumption, one item at a time. A
/// handler error is not caught: the fault is reported and the worker
/// terminates, taking the rest of the queue with it.
async fn run_worker<T: Send + 'static>(
    mut queue: UnboundedReceiver<WorkItem<T>>,
    handler: Arc<dyn Handler<T>>,
    notices: UnboundedSender<Notice>,
    name: String,
) {
    while let Some(item) = queue.recv().await {
        let token = item.token;
        match handler.on_work_item(item.payload).await {
            Ok(()) => {
                tracing::debug!(dispatcher = %name, token, "work item handled");
                let _ = notices.send(Notice::Completed { token });
            }
            Err(error) => {
                tracing::error!(
                    dispatcher = %name,
                    token,
                    error = %error,
                    "handler failed; worker terminating"
                );
                let _ = notices.send(Notice::Faulted { token, error });
                return;
            }
        }
    }
}
