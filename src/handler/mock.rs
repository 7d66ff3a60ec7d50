use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::Handler;

/// A recording handler for tests. Remembers every payload it handled, in
/// order, and tracks how many invocations were ever in flight at once.
pub struct MockHandler {
    delay: Option<Duration>,
    fail_on: Option<String>,
    handled: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockHandler {
    pub fn new() -> Self {
        Self {
            delay: None,
            fail_on: None,
            handled: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every invocation (simulates slow work).
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail (once) when this exact payload comes through.
    pub fn failing_on(mut self, payload: impl Into<String>) -> Self {
        self.fail_on = Some(payload.into());
        self
    }

    /// Payloads handled so far, in completion order.
    pub fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }

    /// High-water mark of concurrent invocations. 1 means no overlap.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler<String> for MockHandler {
    async fn on_work_item(&self, payload: String) -> Result<()> {
        let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(in_flight, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.as_deref() == Some(payload.as_str()) {
            bail!("MockHandler: scripted failure on {:?}", payload);
        }

        self.handled.lock().unwrap().push(payload);
        Ok(())
    }
}
