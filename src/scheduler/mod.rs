//! Task scheduling for the bridge.
//!
//! - **Task**: a poll of one queue, or one handler run for one notification
//! - **TaskQueue**: the single shared FIFO every worker pulls from
//! - **WorkerPool**: fixed set of workers executing tasks concurrently
//!
//! # Architecture
//!
//! ```text
//!      ┌────────────┐   ┌────────────┐
//!      │ PollTask q1│   │ PollTask q2│   (re-queued after every run)
//!      └─────┬──────┘   └─────┬──────┘
//!            │                │
//!      ┌─────▼────────────────▼─────┐
//!      │          TaskQueue         │◄──── WorkTasks from each poll
//!      └─────┬──────────┬──────┬────┘
//!            │          │      │
//!            ▼          ▼      ▼
//!       ┌─────────┐ ┌─────────┐ ┌─────────┐
//!       │ Worker 1│ │ Worker 2│ │ Worker N│
//!       └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cfn_resource_bridge::scheduler::{TaskContext, WorkerPool, WorkerPoolConfig};
//!
//! let context = TaskContext::new(transport, runner, sender, registry);
//! let mut pool = WorkerPool::new(WorkerPoolConfig::default(), context);
//! pool.start()?;
//!
//! tokio::signal::ctrl_c().await?;
//! pool.shutdown().await?;
//! ```

pub mod task;
pub mod worker_pool;

pub use task::{
    PollOutcome, PollTask, Task, TaskContext, WorkTask, DEFAULT_MAX_MESSAGES, DEFAULT_WAIT_TIME,
    MAX_MESSAGES_LIMIT,
};
pub use worker_pool::{pool_size, PoolError, PoolStats, TaskQueue, WorkerPool, WorkerPoolConfig};
