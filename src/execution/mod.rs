//! Execution substrate used to deliver events off the publisher's thread.
//!
//! The dispatch core only talks to the [`ExecutionManager`] trait:
//! - `submit` a task under an ordering tag
//! - register or clear serial scheduling for a tag
//!
//! [`BasicExecutionManager`] is the in-process implementation: a fixed pool
//! of worker threads fed by a shared queue, with one FIFO lane per tag that
//! has pending work. Serial tags keep their lane while idle.
//! A panicking task is caught, logged and counted; the lane moves on to the
//! next task.

mod manager;
mod types;

pub use manager::BasicExecutionManager;
pub use types::{ExecutionConfig, ExecutionManager, ExecutionTag, Task};
