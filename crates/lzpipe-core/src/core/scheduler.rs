use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::telemetry::tags;
use crate::telemetry::worker::{DefaultSchedulerTelemetry, SchedulerTelemetry};
use crate::{LzpipeError, Result};

/// Unit of work accepted by a [`TaskScheduler`].
///
/// The closure owns everything it needs; ownership moves into the scheduler at
/// submission and is released when the task body returns.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool with a bounded queue and a drain barrier.
///
/// `submit` blocks while the queue is full, `drain` blocks until nothing is
/// queued or running. Task bodies execute outside every scheduler lock, so a
/// task may submit to another scheduler (or to this one, provided the queue is
/// not saturated by tasks doing the same).
///
/// A scheduler built with [`TaskScheduler::inline`] runs each task on the
/// submitting thread before `submit` returns; drain semantics are unchanged.
pub struct TaskScheduler {
    name: &'static str,
    workers: usize,
    capacity: usize,
    state: Arc<SchedulerState>,
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
    worker_ids: Vec<ThreadId>,
}

/// Point-in-time counters for a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub workers: usize,
    pub capacity: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queued: usize,
    in_flight: usize,
}

struct SchedulerState {
    name: &'static str,
    counters: Mutex<Counters>,
    idle: Condvar,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    first_panic: Mutex<Option<String>>,
    telemetry: Arc<dyn SchedulerTelemetry>,
}

impl SchedulerState {
    fn new(name: &'static str, telemetry: Arc<dyn SchedulerTelemetry>) -> Self {
        Self {
            name,
            counters: Mutex::new(Counters::default()),
            idle: Condvar::new(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            first_panic: Mutex::new(None),
            telemetry,
        }
    }

    fn lock_counters(&self) -> MutexGuard<'_, Counters> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn on_enqueued(&self) {
        let depth = {
            let mut counters = self.lock_counters();
            counters.queued += 1;
            counters.queued
        };
        self.submitted.fetch_add(1, Ordering::AcqRel);
        self.telemetry.on_queue_depth(self.name, depth);
    }

    fn on_dequeued(&self) {
        let mut counters = self.lock_counters();
        counters.queued = counters.queued.saturating_sub(1);
        counters.in_flight += 1;
    }

    fn on_finished(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
        let mut counters = self.lock_counters();
        counters.in_flight = counters.in_flight.saturating_sub(1);
        if counters.queued == 0 && counters.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    fn run(&self, worker_id: usize, task: Task) {
        self.telemetry.on_task_started(self.name, worker_id);
        let started_at = Instant::now();
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                self.telemetry
                    .on_task_finished(self.name, worker_id, started_at.elapsed());
            }
            Err(payload) => {
                self.panicked.fetch_add(1, Ordering::AcqRel);
                self.telemetry
                    .on_task_panicked(self.name, worker_id, started_at.elapsed());
                let message = panic_message(payload.as_ref());
                let mut slot = match self.first_panic.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                slot.get_or_insert(message);
            }
        }
        self.on_finished();
    }

    fn wait_idle(&self) {
        let mut counters = self.lock_counters();
        while counters.queued > 0 || counters.in_flight > 0 {
            counters = match self.idle.wait(counters) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl TaskScheduler {
    /// Creates a pool of `workers` threads sharing a queue of `capacity` tasks.
    pub fn new(name: &'static str, workers: usize, capacity: usize) -> Result<Self> {
        Self::with_telemetry(name, workers, capacity, Arc::new(DefaultSchedulerTelemetry))
    }

    /// Creates a pool with a custom telemetry backend.
    pub fn with_telemetry(
        name: &'static str,
        workers: usize,
        capacity: usize,
        telemetry: Arc<dyn SchedulerTelemetry>,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(LzpipeError::InvalidConfig(
                "scheduler needs at least one worker".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(LzpipeError::InvalidConfig(
                "scheduler queue capacity must be at least one".to_string(),
            ));
        }

        let state = Arc::new(SchedulerState::new(name, telemetry));
        let (sender, receiver) = bounded::<Task>(capacity);

        let mut handles = Vec::with_capacity(workers);
        let mut worker_ids = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let worker_state = Arc::clone(&state);
            let worker_rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || run_worker_loop(worker_id, worker_state, worker_rx))
                .map_err(|err| {
                    LzpipeError::Allocation(format!("failed to spawn {name} worker: {err}"))
                })?;
            worker_ids.push(handle.thread().id());
            handles.push(handle);
        }

        tracing::debug!(
            target: tags::TARGET_SCHEDULER,
            scheduler = name,
            workers,
            capacity,
            "scheduler started"
        );

        Ok(Self {
            name,
            workers,
            capacity,
            state,
            sender: Some(sender),
            handles,
            worker_ids,
        })
    }

    /// Creates a scheduler that executes every task synchronously inside `submit`.
    pub fn inline(name: &'static str) -> Self {
        Self {
            name,
            workers: 1,
            capacity: 1,
            state: Arc::new(SchedulerState::new(
                name,
                Arc::new(DefaultSchedulerTelemetry),
            )),
            sender: None,
            handles: Vec::new(),
            worker_ids: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_inline(&self) -> bool {
        self.sender.is_none()
    }

    /// Queues `task`, blocking while the queue is full. Work is never dropped.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_boxed(Box::new(task))
    }

    /// Queues an already boxed task.
    pub fn submit_boxed(&self, task: Task) -> Result<()> {
        self.state.on_enqueued();

        let Some(sender) = self.sender.as_ref() else {
            self.state.on_dequeued();
            self.state.run(0, task);
            return Ok(());
        };

        if sender.send(task).is_err() {
            // Workers only exit once the sender is dropped, so this is unreachable
            // while `self` is alive; keep the counters honest anyway.
            self.state.on_dequeued();
            self.state.on_finished();
            return Err(LzpipeError::TaskPanicked(format!(
                "{} scheduler workers are gone",
                self.name
            )));
        }
        Ok(())
    }

    /// Blocks until the queue is empty and no worker is mid-task.
    ///
    /// Safe to call repeatedly while other threads keep submitting; it returns at
    /// the first instant both counters are observed at zero. Calling it from a
    /// task running on this same scheduler deadlocks.
    pub fn drain(&self) {
        self.state.wait_idle();
    }

    /// Current queue and execution counters.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let counters = self.state.lock_counters();
        SchedulerSnapshot {
            workers: self.workers,
            capacity: self.capacity,
            queued: counters.queued,
            in_flight: counters.in_flight,
            submitted: self.state.submitted.load(Ordering::Acquire),
            completed: self.state.completed.load(Ordering::Acquire),
            panicked: self.state.panicked.load(Ordering::Acquire),
        }
    }

    /// Takes the message of the first task that panicked, if any.
    pub fn take_panic(&self) -> Option<String> {
        let mut slot = match self.state.first_panic.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    /// Drains outstanding work, stops the workers, and reports any task panic.
    pub fn join(mut self) -> Result<()> {
        self.shutdown();
        match self.take_panic() {
            Some(message) => Err(LzpipeError::TaskPanicked(message)),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        self.drain();
        self.sender = None;

        let current = thread::current().id();
        if self.worker_ids.contains(&current) {
            // Dropped from one of our own workers; joining would wait on ourselves.
            self.handles.clear();
            return;
        }

        for handle in self.handles.drain(..) {
            // Task panics are caught inside the loop, so a join error means the
            // loop itself failed; there is nothing left to clean up for it.
            let _ = handle.join();
        }

        tracing::debug!(
            target: tags::TARGET_SCHEDULER,
            scheduler = self.name,
            "scheduler stopped"
        );
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if self.sender.is_some() || !self.handles.is_empty() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("inline", &self.is_inline())
            .finish()
    }
}

fn run_worker_loop(worker_id: usize, state: Arc<SchedulerState>, tasks: Receiver<Task>) {
    while let Ok(task) = tasks.recv() {
        state.on_dequeued();
        state.run(worker_id, task);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Resolves a requested worker count; `0` means detected cores minus one reserve.
pub fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    num_cpus::get().saturating_sub(1).max(1)
}
