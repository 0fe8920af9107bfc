// src/scheduler/mod.rs
//! Agent execution: tasks, wakers, timers and the work-stealing pool

pub(crate) mod task;
pub(crate) mod timer;
pub(crate) mod waker;
pub mod work_stealing;

pub use task::AgentState;
pub use work_stealing::{SchedulerStats, WorkStealingScheduler};

pub(crate) use task::{AgentHeader, RunOutcome, Runnable, Task, TurnReport};
pub(crate) use timer::Timer;
pub(crate) use waker::{block_until, AgentWaker};
