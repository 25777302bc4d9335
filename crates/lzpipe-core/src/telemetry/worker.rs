use std::time::Duration;

use crate::telemetry;
use crate::telemetry::tags;
use crate::types::duration_to_us;

/// Telemetry contract for scheduler workers.
///
/// Schedulers call these hooks around every task so metrics backends can be
/// swapped without touching the worker loop.
pub trait SchedulerTelemetry: Send + Sync {
    fn on_queue_depth(&self, scheduler: &str, depth: usize);
    fn on_task_started(&self, scheduler: &str, worker_id: usize);
    fn on_task_finished(&self, scheduler: &str, worker_id: usize, elapsed: Duration);
    fn on_task_panicked(&self, scheduler: &str, worker_id: usize, elapsed: Duration);
}

/// Default implementation feeding the in-process registry and `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSchedulerTelemetry;

impl SchedulerTelemetry for DefaultSchedulerTelemetry {
    fn on_queue_depth(&self, scheduler: &str, depth: usize) {
        telemetry::set_gauge(
            tags::METRIC_SCHEDULER_QUEUE_DEPTH,
            depth as u64,
            &[("subsystem", "scheduler"), ("scheduler", scheduler)],
        );
    }

    fn on_task_started(&self, scheduler: &str, worker_id: usize) {
        telemetry::increment_counter(
            tags::METRIC_SCHEDULER_TASK_START_COUNT,
            1,
            &[("subsystem", "scheduler"), ("scheduler", scheduler), ("op", "task_start")],
        );
        tracing::trace!(
            target: tags::TARGET_SCHEDULER,
            scheduler,
            worker_id,
            "task started"
        );
    }

    fn on_task_finished(&self, scheduler: &str, worker_id: usize, elapsed: Duration) {
        let elapsed_us = duration_to_us(elapsed);
        telemetry::increment_counter(
            tags::METRIC_SCHEDULER_TASK_FINISH_COUNT,
            1,
            &[("subsystem", "scheduler"), ("scheduler", scheduler), ("op", "task_finish")],
        );
        telemetry::record_histogram(
            tags::METRIC_SCHEDULER_TASK_LATENCY_US,
            elapsed_us,
            &[("subsystem", "scheduler"), ("scheduler", scheduler), ("op", "task_finish")],
        );
        tracing::trace!(
            target: tags::TARGET_SCHEDULER,
            scheduler,
            worker_id,
            elapsed_us,
            "task finished"
        );
    }

    fn on_task_panicked(&self, scheduler: &str, worker_id: usize, elapsed: Duration) {
        telemetry::increment_counter(
            tags::METRIC_SCHEDULER_TASK_PANIC_COUNT,
            1,
            &[("subsystem", "scheduler"), ("scheduler", scheduler), ("op", "task_panic")],
        );
        tracing::warn!(
            target: tags::TARGET_SCHEDULER,
            scheduler,
            worker_id,
            elapsed_us = duration_to_us(elapsed),
            "task panicked"
        );
    }
}
