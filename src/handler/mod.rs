pub mod mock;
pub mod shell;

use anyhow::Result;
use async_trait::async_trait;

/// What the worker does with each item. Supplied by the integrator.
///
/// Invoked once per item, only ever on the worker task, never on the
/// submitting one. May take as long as it needs; a slow handler delays
/// only the items queued behind it. An error return is fatal to the
/// worker: no catch, no retry, the fault is surfaced as
/// [`Notice::Faulted`](crate::dispatch::Notice::Faulted).
#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn on_work_item(&self, payload: T) -> Result<()>;
}
