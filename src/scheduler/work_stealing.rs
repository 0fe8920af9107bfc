// src/scheduler/work_stealing.rs
//! Work-stealing scheduler for agent tasks
//!
//! A fixed pool of OS threads multiplexes any number of agents. Each worker
//! owns a bounded run deque plus a one-task "next" slot. The owner pushes and
//! pops at the back; idle workers steal batches from the front, the oldest
//! end. Agents that yield go to the back of the line through the worker's own
//! inbox, so a busy agent cannot keep the deque's hot end to itself.
//!
//! # Architecture
//!
//! ```text
//!            spawn / wake (off-pool)
//!                     │
//!                     ▼
//!              [ global injector ]
//!                     │ batch
//!   ┌─────────────────┼─────────────────┐
//!   ▼                 ▼                 ▼
//! Worker 0          Worker 1          Worker 2
//! [next]            [next]            [next]
//! [local ....]      [local ....]      [local ....]   owner: back
//! [inbox]           [inbox]           [inbox]        yields land here
//!   ▲                                   │
//!   └──────── steal half (front) ◄──────┘
//! ```
//!
//! # Scheduling order
//!
//! 1. Every 61 ticks: own inbox, then global queue (starvation guard)
//! 2. The "next" slot, at most 3 times in a row (wake locality)
//! 3. The local queue
//! 4. Own inbox, then global queue
//! 5. Steal from peers in the strategy's victim order
//! 6. Park with a timeout
//!
//! # Performance
//!
//! - At most `max(1, workers / 2)` workers search for work at once
//! - Pushing local work only unparks a peer when nobody is searching
//! - Parks are bounded, so a missed unpark costs at most one park timeout

use crate::capability::AgentId;
use crate::observability::RuntimeMetrics;
use crate::scheduler::task::{RunOutcome, Task, TurnReport};
use crate::strategy::profile::ewma;
use crate::strategy::{
    Placement, ProfileStore, SchedulingStrategy, TurnSample, WorkerLoadSnapshot, WorkerPhase,
};
use crate::utils::{Result, RuntimeError, SchedulerConfig};
use crossbeam::deque::{Injector, Steal, Stealer, Worker};
use crossbeam::sync::{Parker, Unparker};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Ticks between forced checks of the inbox and global queue
const GLOBAL_POLL_INTERVAL: u64 = 61;

/// Consecutive turns taken from the "next" slot before the local queue
const MAX_NEXT_STREAK: usize = 3;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<WorkerCore>> = const { RefCell::new(None) };
}

const PHASE_IDLE: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_STEALING: u8 = 2;

/// Cross-thread view of one worker
struct WorkerSlot {
    /// Local queue length plus the "next" slot, as last published
    queued: AtomicUsize,

    /// Moving average of turn time (f64 bits)
    mean_turn_ns: AtomicU64,

    /// Moving average of the strategy's profiled cost per turn (f64 bits)
    predicted_turn_ns: AtomicU64,

    phase: AtomicU8,

    unparker: Unparker,
}

impl WorkerSlot {
    fn set_phase(&self, phase: WorkerPhase) {
        let raw = match phase {
            WorkerPhase::Idle => PHASE_IDLE,
            WorkerPhase::Running => PHASE_RUNNING,
            WorkerPhase::Stealing => PHASE_STEALING,
        };
        self.phase.store(raw, Ordering::Relaxed);
    }

    fn phase(&self) -> WorkerPhase {
        match self.phase.load(Ordering::Relaxed) {
            PHASE_RUNNING => WorkerPhase::Running,
            PHASE_STEALING => WorkerPhase::Stealing,
            _ => WorkerPhase::Idle,
        }
    }
}

/// Thread-owned part of a worker; lives in `CURRENT` on its thread
struct WorkerCore {
    scheduler_id: u64,
    index: usize,
    local: Worker<Task>,
    next: Option<Task>,
    next_streak: usize,
    tick: u64,
}

impl WorkerCore {
    fn next_task(&mut self, shared: &SchedulerShared) -> Option<Task> {
        self.tick = self.tick.wrapping_add(1);

        let task = if self.tick % GLOBAL_POLL_INTERVAL == 0 {
            self.pop_remote(shared).or_else(|| self.pop_local())
        } else {
            self.pop_local().or_else(|| self.pop_remote(shared))
        };

        self.publish(shared);
        task
    }

    fn pop_local(&mut self) -> Option<Task> {
        if self.next_streak < MAX_NEXT_STREAK {
            if let Some(task) = self.next.take() {
                self.next_streak += 1;
                return Some(task);
            }
        }

        self.next_streak = 0;
        self.local.pop().or_else(|| self.next.take())
    }

    fn pop_remote(&mut self, shared: &SchedulerShared) -> Option<Task> {
        drain_injector(&shared.inboxes[self.index], &self.local)
            .or_else(|| drain_injector(&shared.global, &self.local))
    }

    /// Run `task` right after the current turn
    fn push_next(&mut self, shared: &SchedulerShared, task: Task) {
        if let Some(displaced) = self.next.replace(task) {
            self.push_local(shared, displaced);
        } else {
            self.publish(shared);
        }
    }

    fn push_local(&mut self, shared: &SchedulerShared, task: Task) {
        if self.local.len() >= shared.config.local_queue_capacity {
            trace!("Worker {} local queue full, overflowing to global", self.index);
            shared.global.push(task);
        } else {
            self.local.push(task);
        }

        self.publish(shared);
        shared.notify_if_unsearched();
    }

    fn publish(&self, shared: &SchedulerShared) {
        let queued = self.local.len() + usize::from(self.next.is_some());
        shared.slots[self.index]
            .queued
            .store(queued, Ordering::Relaxed);
    }

    fn len(&self) -> usize {
        self.local.len() + usize::from(self.next.is_some())
    }
}

fn drain_injector(injector: &Injector<Task>, local: &Worker<Task>) -> Option<Task> {
    loop {
        match injector.steal_batch_and_pop(local) {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

/// State shared by all workers of one scheduler
pub(crate) struct SchedulerShared {
    id: u64,

    config: SchedulerConfig,

    /// Off-pool spawns and wakes
    global: Injector<Task>,

    /// Per-worker queues for placements made from another thread
    inboxes: Vec<Injector<Task>>,

    stealers: Vec<Stealer<Task>>,

    slots: Vec<WorkerSlot>,

    /// Parked (or about to park) workers
    idle: Mutex<Vec<usize>>,

    /// Workers currently searching for work
    searching: AtomicUsize,

    max_stealers: usize,

    shutdown: AtomicBool,

    strategy: Arc<dyn SchedulingStrategy>,

    profiles: Arc<ProfileStore>,

    metrics: Arc<RuntimeMetrics>,
}

impl SchedulerShared {
    /// Queue a woken task, preferring the current worker's "next" slot
    pub(crate) fn schedule(&self, task: Task) {
        let leftover = self.with_local(task, |core, shared, task| {
            core.push_next(shared, task);
            None
        });

        if let Some(task) = leftover {
            self.global.push(task);
            self.notify_one();
        }
    }

    /// Queue a newly spawned task according to `placement`
    pub(crate) fn submit(&self, task: Task, placement: Placement) {
        match placement {
            Placement::Worker(index) if index < self.inboxes.len() => {
                let leftover = self.with_local(task, |core, shared, task| {
                    if core.index == index {
                        core.push_local(shared, task);
                        None
                    } else {
                        Some(task)
                    }
                });

                if let Some(task) = leftover {
                    self.inboxes[index].push(task);
                    self.unpark(index);
                }
            }
            _ => {
                self.global.push(task);
                self.notify_one();
            }
        }
    }

    /// Index of the calling worker, if it belongs to this scheduler
    pub(crate) fn current_worker(&self) -> Option<usize> {
        CURRENT
            .try_with(|cell| {
                let guard = cell.try_borrow().ok()?;
                guard
                    .as_ref()
                    .filter(|core| core.scheduler_id == self.id)
                    .map(|core| core.index)
            })
            .ok()
            .flatten()
    }

    pub(crate) fn loads(&self) -> Vec<WorkerLoadSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| WorkerLoadSnapshot {
                index,
                queued: slot.queued.load(Ordering::Relaxed) + self.inboxes[index].len(),
                mean_turn_ns: f64::from_bits(slot.mean_turn_ns.load(Ordering::Relaxed)),
                predicted_turn_ns: f64::from_bits(slot.predicted_turn_ns.load(Ordering::Relaxed)),
                phase: slot.phase(),
            })
            .collect()
    }

    pub(crate) fn strategy(&self) -> &Arc<dyn SchedulingStrategy> {
        &self.strategy
    }

    pub(crate) fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    /// Run `f` against this thread's worker core if it belongs to us
    ///
    /// Returns the task untouched when called off-pool, from another
    /// scheduler's worker, or while the core is already borrowed.
    fn with_local(
        &self,
        task: Task,
        f: impl FnOnce(&mut WorkerCore, &Self, Task) -> Option<Task>,
    ) -> Option<Task> {
        let mut pending = Some(task);

        let _ = CURRENT.try_with(|cell| {
            let Ok(mut guard) = cell.try_borrow_mut() else {
                return;
            };
            let Some(core) = guard.as_mut() else {
                return;
            };
            if core.scheduler_id != self.id {
                return;
            }
            if let Some(task) = pending.take() {
                pending = f(core, self, task);
            }
        });

        pending
    }

    fn notify_one(&self) {
        let index = self.idle.lock().pop();
        if let Some(index) = index {
            trace!("Unparking worker {}", index);
            self.slots[index].unparker.unpark();
        }
    }

    fn notify_if_unsearched(&self) {
        if self.searching.load(Ordering::Acquire) == 0 {
            self.notify_one();
        }
    }

    fn unpark(&self, index: usize) {
        self.idle.lock().retain(|&i| i != index);
        self.slots[index].unparker.unpark();
    }

    fn unpark_all(&self) {
        self.idle.lock().clear();
        for slot in &self.slots {
            slot.unparker.unpark();
        }
    }

    fn has_work(&self, index: usize) -> bool {
        !self.inboxes[index].is_empty() || !self.global.is_empty()
    }

    fn try_begin_search(&self) -> bool {
        let mut current = self.searching.load(Ordering::Acquire);
        loop {
            if current >= self.max_stealers {
                return false;
            }
            match self.searching.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn next_local_task(&self) -> Option<Task> {
        CURRENT
            .try_with(|cell| {
                let mut guard = cell.try_borrow_mut().ok()?;
                guard.as_mut()?.next_task(self)
            })
            .ok()
            .flatten()
    }

    /// Steal a batch from peers; returns one task to run now
    fn steal(&self, index: usize, rng: &mut dyn RngCore) -> Option<Task> {
        if !self.try_begin_search() {
            return None;
        }
        self.slots[index].set_phase(WorkerPhase::Stealing);

        let victims = self.strategy.victim_order(index, &self.loads(), rng);
        let found = CURRENT
            .try_with(|cell| {
                let guard = cell.try_borrow().ok()?;
                let core = guard.as_ref()?;
                let found = self.steal_rounds(index, &victims, &core.local);
                core.publish(self);
                found
            })
            .ok()
            .flatten();

        self.searching.fetch_sub(1, Ordering::AcqRel);

        let (task, stolen, victim) = found?;
        trace!("Worker {} stole {} tasks from {}", index, stolen, victim);
        self.metrics.record_steal(stolen);
        if stolen > 1 {
            // More work than we can run right away; let a peer help.
            self.notify_if_unsearched();
        }
        Some(task)
    }

    fn steal_rounds(
        &self,
        index: usize,
        victims: &[usize],
        local: &Worker<Task>,
    ) -> Option<(Task, usize, usize)> {
        for round in 0..self.config.steal_attempts.max(1) {
            for &victim in victims {
                if victim == index || victim >= self.stealers.len() {
                    continue;
                }

                let before = local.len();
                let stolen = steal_once(|| self.stealers[victim].steal_batch_and_pop(local))
                    .or_else(|| steal_once(|| self.inboxes[victim].steal_batch_and_pop(local)));
                if let Some(task) = stolen {
                    let count = 1 + local.len().saturating_sub(before);
                    return Some((task, count, victim));
                }
            }

            let before = local.len();
            if let Some(task) = drain_injector(&self.global, local) {
                let count = 1 + local.len().saturating_sub(before);
                return Some((task, count, index));
            }

            if round + 1 < self.config.steal_attempts {
                std::thread::yield_now();
            }
        }

        None
    }

    fn park(&self, index: usize, parker: &Parker) {
        self.slots[index].set_phase(WorkerPhase::Idle);
        self.idle.lock().push(index);

        // Re-check after registering so a concurrent push cannot be missed.
        if self.has_work(index) || self.shutdown.load(Ordering::Acquire) {
            self.idle.lock().retain(|&i| i != index);
            return;
        }

        parker.park_timeout(self.config.park_timeout());
        self.idle.lock().retain(|&i| i != index);
    }

    fn run_task(&self, index: usize, mut task: Task) {
        let header = Arc::clone(task.header());
        if !header.begin_run() {
            trace!("Dropping finished task for {}", header.id());
            return;
        }

        self.slots[index].set_phase(WorkerPhase::Running);
        let started = Instant::now();
        let report = task.run(self.config.quantum);
        self.record_turn(index, header.id(), started, report);

        match report.outcome {
            RunOutcome::Yield => {
                if header.reschedule() {
                    self.requeue(index, task);
                }
            }
            RunOutcome::Wait => {
                if let Some(task) = header.suspend(task) {
                    self.requeue(index, task);
                }
            }
            RunOutcome::Done => {
                header.finish();
                self.profiles.remove(header.id());
                drop(task);
            }
        }
    }

    /// Put a still-runnable task behind everything `index` already holds
    ///
    /// The inbox is FIFO and still visible to thieves.
    fn requeue(&self, index: usize, task: Task) {
        self.inboxes[index].push(task);
        self.notify_if_unsearched();
    }

    fn record_turn(&self, index: usize, agent: AgentId, started: Instant, report: TurnReport) {
        let elapsed = started.elapsed();
        let alpha = self.profiles.alpha();
        let slot = &self.slots[index];
        fold_average(&slot.mean_turn_ns, elapsed.as_nanos() as f64, alpha);

        self.metrics.record_turn(index);
        let profile = self.profiles.record(
            agent,
            TurnSample {
                elapsed,
                messages: report.messages,
                quantum_exhausted: report.outcome == RunOutcome::Yield,
                at: Instant::now(),
            },
        );
        fold_average(&slot.predicted_turn_ns, self.strategy.turn_cost(&profile), alpha);
    }
}

/// Fold `sample` into the f64 moving average stored in `cell`
fn fold_average(cell: &AtomicU64, sample: f64, alpha: f64) {
    let previous = f64::from_bits(cell.load(Ordering::Relaxed));
    let next = if previous == 0.0 {
        sample
    } else {
        ewma(previous, sample, alpha)
    };
    cell.store(next.to_bits(), Ordering::Relaxed);
}

fn steal_once(mut attempt: impl FnMut() -> Steal<Task>) -> Option<Task> {
    loop {
        match attempt() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => std::hint::spin_loop(),
        }
    }
}

fn run_worker(shared: Arc<SchedulerShared>, index: usize, local: Worker<Task>, parker: Parker) {
    let installed = CURRENT.try_with(|cell| {
        *cell.borrow_mut() = Some(WorkerCore {
            scheduler_id: shared.id,
            index,
            local,
            next: None,
            next_streak: 0,
            tick: 0,
        });
    });
    if installed.is_err() {
        warn!("Worker {} could not install its run queue", index);
        return;
    }

    debug!("Worker {} started", index);
    let mut rng = rand::thread_rng();

    while !shared.shutdown.load(Ordering::Acquire) {
        if let Some(task) = shared.next_local_task() {
            shared.run_task(index, task);
            continue;
        }

        if let Some(task) = shared.steal(index, &mut rng) {
            shared.run_task(index, task);
            continue;
        }

        shared.park(index, &parker);
    }

    // Take the core out before dropping it; dropped tasks may wake others.
    let core = CURRENT.try_with(|cell| cell.borrow_mut().take()).ok().flatten();
    let dropped = core.as_ref().map(WorkerCore::len).unwrap_or(0);
    drop(core);
    debug!("Worker {} stopped ({} queued tasks dropped)", index, dropped);
}

/// Worker threads not yet started
struct PendingWorker {
    index: usize,
    local: Worker<Task>,
    parker: Parker,
}

/// Work-stealing scheduler over a fixed pool of worker threads
pub struct WorkStealingScheduler {
    shared: Arc<SchedulerShared>,

    pending: Mutex<Vec<PendingWorker>>,

    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkStealingScheduler {
    /// Create a scheduler; no threads run until [`start`](Self::start)
    pub fn new(
        config: SchedulerConfig,
        strategy: Arc<dyn SchedulingStrategy>,
        profiles: Arc<ProfileStore>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        let num_workers = config.worker_count();

        let mut pending = Vec::with_capacity(num_workers);
        let mut stealers = Vec::with_capacity(num_workers);
        let mut slots = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let local = Worker::new_lifo();
            let parker = Parker::new();
            stealers.push(local.stealer());
            slots.push(WorkerSlot {
                queued: AtomicUsize::new(0),
                mean_turn_ns: AtomicU64::new(0),
                predicted_turn_ns: AtomicU64::new(0),
                phase: AtomicU8::new(PHASE_IDLE),
                unparker: parker.unparker().clone(),
            });
            pending.push(PendingWorker {
                index,
                local,
                parker,
            });
        }

        debug!(
            "Work-stealing scheduler initialized with {} workers ({} strategy)",
            num_workers,
            strategy.name()
        );

        let shared = Arc::new(SchedulerShared {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            max_stealers: config.max_stealers(),
            config,
            global: Injector::new(),
            inboxes: (0..num_workers).map(|_| Injector::new()).collect(),
            stealers,
            slots,
            idle: Mutex::new(Vec::with_capacity(num_workers)),
            searching: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            strategy,
            profiles,
            metrics,
        });

        Self {
            shared,
            pending: Mutex::new(pending),
            handles: Mutex::new(Vec::with_capacity(num_workers)),
        }
    }

    /// Spawn the worker threads
    pub fn start(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "scheduler already started".into(),
            ));
        }

        let mut handles = self.handles.lock();
        for worker in pending {
            let shared = Arc::clone(&self.shared);
            let PendingWorker {
                index,
                local,
                parker,
            } = worker;

            let handle = std::thread::Builder::new()
                .name(format!("agent-weave-worker-{}", index))
                .spawn(move || run_worker(shared, index, local, parker))
                .map_err(|e| {
                    RuntimeError::ConfigError(format!("failed to spawn worker {}: {}", index, e))
                })?;
            handles.push(handle);
        }

        info!("Started {} scheduler workers", handles.len());
        Ok(())
    }

    /// Stop every worker and wait for the threads to exit
    ///
    /// Tasks still queued are dropped. Safe to call from a worker thread;
    /// that thread is not joined.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.unpark_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!("Scheduler thread {} panicked", name);
            }
        }

        debug!("Scheduler {} shut down", self.shared.id);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    pub fn num_workers(&self) -> usize {
        self.shared.slots.len()
    }

    /// Queue a new task
    pub(crate) fn submit(&self, task: Task, placement: Placement) {
        self.shared.submit(task, placement);
    }

    pub(crate) fn shared(&self) -> &Arc<SchedulerShared> {
        &self.shared
    }

    /// Index of the calling worker thread, if it is one of ours
    pub fn current_worker(&self) -> Option<usize> {
        self.shared.current_worker()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let global_queue_size = self.shared.global.len();
        let loads = self.shared.loads();

        let local_queue_sizes: Vec<usize> = loads.iter().map(|l| l.queued).collect();
        let total_local: usize = local_queue_sizes.iter().sum();

        SchedulerStats {
            global_queue_size,
            total_tasks: global_queue_size + total_local,
            local_queue_sizes,
            num_workers: loads.len(),
            searching: self.shared.searching.load(Ordering::Relaxed),
            idle_workers: self.shared.idle.lock().len(),
            phases: loads.iter().map(|l| l.phase).collect(),
            predicted_turn_ns: loads.iter().map(|l| l.predicted_turn_ns).collect(),
            strategy: self.shared.strategy.name(),
        }
    }
}

impl Drop for WorkStealingScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub global_queue_size: usize,

    /// Per worker: local queue, "next" slot and inbox
    pub local_queue_sizes: Vec<usize>,

    pub total_tasks: usize,
    pub num_workers: usize,

    /// Workers searching for work right now
    pub searching: usize,

    pub idle_workers: usize,
    pub phases: Vec<WorkerPhase>,

    /// Per worker: profiled cost of one turn, nanoseconds (0 until measured)
    pub predicted_turn_ns: Vec<f64>,

    pub strategy: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{AgentHeader, Runnable};
    use crate::strategy::{DefaultStrategy, PredictiveStrategy};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingTask {
        header: Arc<AgentHeader>,
        turns_left: usize,
        busy: Duration,
        done: Arc<AtomicUsize>,
    }

    impl Runnable for CountingTask {
        fn header(&self) -> &Arc<AgentHeader> {
            &self.header
        }

        fn run(&mut self, _quantum: usize) -> TurnReport {
            let until = Instant::now() + self.busy;
            while Instant::now() < until {
                std::hint::spin_loop();
            }

            self.turns_left = self.turns_left.saturating_sub(1);
            let outcome = if self.turns_left == 0 {
                self.done.fetch_add(1, Ordering::SeqCst);
                RunOutcome::Done
            } else {
                RunOutcome::Yield
            };
            TurnReport {
                outcome,
                messages: 0,
            }
        }
    }

    /// Waits once, then finishes
    struct WaitOnce {
        header: Arc<AgentHeader>,
        waited: bool,
        done: Arc<AtomicUsize>,
    }

    impl Runnable for WaitOnce {
        fn header(&self) -> &Arc<AgentHeader> {
            &self.header
        }

        fn run(&mut self, _quantum: usize) -> TurnReport {
            let outcome = if self.waited {
                self.done.fetch_add(1, Ordering::SeqCst);
                RunOutcome::Done
            } else {
                self.waited = true;
                RunOutcome::Wait
            };
            TurnReport {
                outcome,
                messages: 0,
            }
        }
    }

    fn scheduler(workers: usize) -> (WorkStealingScheduler, Arc<RuntimeMetrics>) {
        let config = SchedulerConfig {
            workers,
            park_timeout_ms: 2,
            ..Default::default()
        };
        let metrics = Arc::new(RuntimeMetrics::new(workers));
        let scheduler = WorkStealingScheduler::new(
            config,
            Arc::new(DefaultStrategy),
            Arc::new(ProfileStore::new(0.2)),
            Arc::clone(&metrics),
        );
        (scheduler, metrics)
    }

    fn header(scheduler: &WorkStealingScheduler) -> Arc<AgentHeader> {
        Arc::new(AgentHeader::new(
            AgentId::next(),
            Arc::downgrade(scheduler.shared()),
        ))
    }

    fn wait_for(count: &AtomicUsize, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if count.load(Ordering::SeqCst) >= expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_scheduler_creation() {
        let (scheduler, _) = scheduler(4);
        let stats = scheduler.stats();
        assert_eq!(stats.num_workers, 4);
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.strategy, "default");
        assert!(scheduler.current_worker().is_none());
    }

    #[test]
    fn test_task_submission_before_start() {
        let (scheduler, _) = scheduler(2);
        let done = Arc::new(AtomicUsize::new(0));
        let task = CountingTask {
            header: header(&scheduler),
            turns_left: 1,
            busy: Duration::ZERO,
            done: Arc::clone(&done),
        };
        scheduler.submit(Box::new(task), Placement::Global);

        let stats = scheduler.stats();
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.global_queue_size, 1);
    }

    #[test]
    fn test_start_twice_fails() {
        let (scheduler, _) = scheduler(1);
        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
    }

    #[test]
    fn test_runs_yielding_tasks_to_completion() {
        let (scheduler, _) = scheduler(2);
        scheduler.start().unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let task = CountingTask {
                header: header(&scheduler),
                turns_left: 5,
                busy: Duration::ZERO,
                done: Arc::clone(&done),
            };
            scheduler.submit(Box::new(task), Placement::Global);
        }

        assert!(wait_for(&done, 50));
        scheduler.shutdown();
    }

    #[test]
    fn test_idle_workers_steal_from_busy_worker() {
        let (scheduler, metrics) = scheduler(4);
        scheduler.start().unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let task = CountingTask {
                header: header(&scheduler),
                turns_left: 3,
                busy: Duration::from_millis(1),
                done: Arc::clone(&done),
            };
            scheduler.submit(Box::new(task), Placement::Worker(0));
        }

        assert!(wait_for(&done, 64));
        scheduler.shutdown();

        let busy_workers = (0..4).filter(|&w| metrics.worker_turns(w) > 0).count();
        assert!(busy_workers > 1, "only {} worker ran tasks", busy_workers);
        assert!(metrics.snapshot().steals > 0);
    }

    #[test]
    fn test_wake_reschedules_waiting_task() {
        let (scheduler, _) = scheduler(2);
        scheduler.start().unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        let header = header(&scheduler);
        let task = WaitOnce {
            header: Arc::clone(&header),
            waited: false,
            done: Arc::clone(&done),
        };
        scheduler.submit(Box::new(task), Placement::Global);

        let deadline = Instant::now() + Duration::from_secs(5);
        while header.state() != crate::scheduler::AgentState::Waiting && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(done.load(Ordering::SeqCst), 0);

        header.wake();
        assert!(wait_for(&done, 1));
        scheduler.shutdown();
    }

    #[test]
    fn test_loads_publish_profiled_turn_cost() {
        let config = SchedulerConfig {
            workers: 1,
            park_timeout_ms: 2,
            ..Default::default()
        };
        let profiles = Arc::new(ProfileStore::new(0.5));
        let scheduler = WorkStealingScheduler::new(
            config,
            Arc::new(PredictiveStrategy::default()),
            Arc::clone(&profiles),
            Arc::new(RuntimeMetrics::new(1)),
        );
        scheduler.start().unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        let task = CountingTask {
            header: header(&scheduler),
            turns_left: 4,
            busy: Duration::from_millis(1),
            done: Arc::clone(&done),
        };
        scheduler.submit(Box::new(task), Placement::Worker(0));
        assert!(wait_for(&done, 1));
        scheduler.shutdown();

        // Every turn but the last exhausted its quantum, so the profiled
        // cost is priced above the raw turn time.
        let load = scheduler.shared().loads()[0];
        assert!(load.mean_turn_ns >= 1_000_000.0);
        assert!(load.predicted_turn_ns > load.mean_turn_ns);
        assert!(profiles.is_empty());
    }

    fn counting(scheduler: &WorkStealingScheduler, turns: usize) -> (Box<CountingTask>, AgentId) {
        let header = header(scheduler);
        let id = header.id();
        let task = CountingTask {
            header,
            turns_left: turns,
            busy: Duration::ZERO,
            done: Arc::new(AtomicUsize::new(0)),
        };
        (Box::new(task), id)
    }

    #[test]
    fn test_thieves_take_the_end_the_owner_does_not() {
        let (scheduler, _) = scheduler(2);
        let pending = scheduler.pending.lock();
        let local = &pending[0].local;

        let ids: Vec<AgentId> = (0..3)
            .map(|_| {
                let (task, id) = counting(&scheduler, 1);
                local.push(task);
                id
            })
            .collect();

        let owned = local.pop().unwrap();
        assert_eq!(owned.header().id(), ids[2]);

        let stolen = match scheduler.shared().stealers[0].steal() {
            Steal::Success(task) => task,
            _ => panic!("nothing to steal"),
        };
        assert_eq!(stolen.header().id(), ids[0]);
    }

    #[test]
    fn test_yielding_agent_does_not_starve_its_worker() {
        let (scheduler, _) = scheduler(1);
        scheduler.start().unwrap();

        // Yields for as long as the scheduler runs.
        let (endless, _) = counting(&scheduler, usize::MAX);
        scheduler.submit(endless, Placement::Worker(0));
        std::thread::sleep(Duration::from_millis(5));

        let done = Arc::new(AtomicUsize::new(0));
        let short = CountingTask {
            header: header(&scheduler),
            turns_left: 3,
            busy: Duration::ZERO,
            done: Arc::clone(&done),
        };
        scheduler.submit(Box::new(short), Placement::Worker(0));

        assert!(wait_for(&done, 1));
        scheduler.shutdown();
    }

    #[test]
    fn test_try_begin_search_is_throttled() {
        let (scheduler, _) = scheduler(4);
        let shared = scheduler.shared();
        assert!(shared.try_begin_search());
        assert!(shared.try_begin_search());
        assert!(!shared.try_begin_search());
        shared.searching.store(0, Ordering::SeqCst);
    }
}
