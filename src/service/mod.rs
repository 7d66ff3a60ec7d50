//! Stop-when-drained policy on top of the dispatcher.
//!
//! The service assigns a monotonically increasing token to every
//! submission and stops the dispatcher exactly when the completed token
//! equals the latest one issued, meaning the queue ran dry and nothing
//! newer arrived since. Work submitted concurrently with that final completion
//! loses the race and gets a "dispatcher is stopped" error back; the
//! caller's move is to build a fresh service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::dispatch::{Dispatcher, Notice};
use crate::handler::Handler;

struct Shared<T> {
    dispatcher: Dispatcher<T>,
    /// Token of the most recent submission. 0 = nothing submitted yet.
    latest: AtomicU64,
    /// Token assignment order must equal queue arrival order.
    submit_lock: Mutex<()>,
}

/// A dispatcher that knows when to stop itself.
pub struct WorkService<T> {
    shared: Arc<Shared<T>>,
    notices: UnboundedReceiver<Notice>,
}

/// Cloneable submit handle, so any number of contexts can feed a
/// draining service.
pub struct ServiceHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ServiceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> WorkService<T> {
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler<T>>) -> Self {
        let (dispatcher, notices) = Dispatcher::new(name, handler);
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                latest: AtomicU64::new(0),
                submit_lock: Mutex::new(()),
            }),
            notices,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.shared.dispatcher.start()
    }

    pub fn handle(&self) -> ServiceHandle<T> {
        ServiceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Submit an item; the assigned token is returned.
    pub fn submit(&self, payload: T) -> Result<u64> {
        self.handle().submit(payload)
    }

    /// Process completion notices until the queue runs dry, then stop the
    /// dispatcher. Blocks across idle gaps: a submission that lands after
    /// an intermediate completion keeps the service alive. A handler
    /// fault stops the service and propagates the error.
    pub async fn drain(&mut self) -> Result<()> {
        self.drain_with(|_| {}).await
    }

    /// Like [`drain`](Self::drain), invoking `on_complete` with each
    /// successfully-handled token (e.g. to mark a journal entry done).
    pub async fn drain_with(&mut self, mut on_complete: impl FnMut(u64)) -> Result<()> {
        while let Some(notice) = self.notices.recv().await {
            match notice {
                Notice::Completed { token } => {
                    on_complete(token);
                    if token == self.shared.latest.load(Ordering::SeqCst) {
                        self.shared.dispatcher.stop();
                        tracing::info!(token, "queue drained, service stopped");
                        return Ok(());
                    }
                }
                Notice::Faulted { token, error } => {
                    self.shared.dispatcher.stop();
                    return Err(error.context(format!("work item {token} failed")));
                }
            }
        }
        Ok(())
    }
}

impl<T: Send + 'static> ServiceHandle<T> {
    /// Submit an item; the assigned token is returned.
    pub fn submit(&self, payload: T) -> Result<u64> {
        let _guard = self.shared.submit_lock.lock().unwrap();
        let token = self.shared.latest.load(Ordering::SeqCst) + 1;
        // Published before the send: if the worker completes an earlier
        // item in between, the drain loop must already see this token as
        // the latest and keep waiting.
        self.shared.latest.store(token, Ordering::SeqCst);
        match self.shared.dispatcher.submit(payload, token) {
            Ok(()) => Ok(token),
            Err(e) => {
                self.shared.latest.store(token - 1, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}
