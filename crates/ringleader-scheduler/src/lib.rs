//! ringleader-scheduler — the master-side task scheduler.
//!
//! Accepts task submissions into a priority queue, assigns them to idle
//! agents, and runs the liveness monitors: dead agents get their in-flight
//! work requeued, and overdue tasks are failed and retried up to a limit.

pub mod error;
pub mod queue;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use queue::PendingQueue;
pub use scheduler::{AgentInfo, AgentStatus, ClusterStatus, SchedulerConfig, TaskScheduler};
