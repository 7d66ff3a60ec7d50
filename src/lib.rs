//! A sequential work dispatcher: one queue, one worker, strict order.
//!
//! Submissions from any number of callers are serialized into a single
//! FIFO queue and executed one at a time on a dedicated worker task.
//! [`dispatch`] is the primitive, [`service`] adds the stop-when-drained
//! policy on top, [`journal`] persists in-flight work for redelivery.

pub mod consts;
pub mod dispatch;
pub mod handler;
pub mod journal;
pub mod service;
