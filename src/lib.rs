//! jobmux — serialized process execution with live output fan-out.
//!
//! Two layered components: a [`jobs::JobRegistry`] that spawns and supervises
//! child processes while broadcasting their combined output to attached
//! sinks, and a [`jobs::WorkQueue`] that drives typed work items through the
//! registry one at a time, in arrival order. The embedding collaborator (an
//! HTTP layer, typically) supplies the kind-to-executable mapping via
//! [`config::QueueConfig`] and owns the sinks it attaches.
//!
//! Known limitation: there is no timeout for running jobs, so a hung child
//! process holds the queue's single execution slot until
//! [`jobs::WorkQueue::remove`] or [`jobs::JobRegistry::stop`] is called.

pub mod config;
pub mod error;
pub mod jobs;
