pub mod scheduler;

pub use scheduler::{SchedulerSnapshot, Task, TaskScheduler, resolve_workers};
