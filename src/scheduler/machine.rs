//! SchedulerCore: the gap/debounce state machine, free of threads and clocks.
//!
//! Every operation takes `now` explicitly and hands tasks back to the driver
//! instead of running them, so the driver can release its own borrows first
//! and tasks may resubmit work without reentrancy problems.
//!
//! States
//! - Idle: no timer. Pending maps are empty.
//! - Armed: timer running with a next fire time; zero or more pending tasks.
//!   A period too large to represent as an `Instant` leaves the core armed
//!   with no deadline, so it never comes due on its own.
//!   After `max_empty_execution_count` consecutive ticks with nothing to
//!   flush the timer is released and the core is Idle again.
//!
//! Ordering
//! - A flush runs all primary tasks, then all post-execution tasks. Within
//!   each map, tasks run by ascending submission time; a per-core sequence
//!   number breaks ties between equal timestamps.
//! - Same-key submissions within one gap window coalesce to the latest one.

use hashbrown::HashMap;
use std::time::{Duration, Instant};

/// Unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Lower bound on the timer period so a zero gap cannot spin.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

pub const DEFAULT_MAX_EMPTY_EXECUTION_COUNT: u32 = 5;

/// Externally visible scheduler state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SchedulerState {
    Idle,
    Armed,
}

/// A pending task with its submission timestamp.
pub struct DatedTask {
    pub scheduled_at: Instant,
    seq: u64,
    task: Task,
}

impl DatedTask {
    pub fn into_task(self) -> Task {
        self.task
    }
}

impl core::fmt::Debug for DatedTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatedTask")
            .field("scheduled_at", &self.scheduled_at)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Keyed pending tasks; one task per key, last submission wins.
#[derive(Default)]
pub struct TaskMap {
    tasks: HashMap<String, DatedTask>,
}

impl TaskMap {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    /// Store `task` under `key`; returns the task it displaced.
    fn insert(&mut self, key: String, task: DatedTask) -> Option<DatedTask> {
        self.tasks.insert(key, task)
    }

    fn remove(&mut self, key: &str) -> Option<DatedTask> {
        self.tasks.remove(key)
    }

    /// Empty the map, returning tasks in ascending submission order.
    fn drain_ordered(&mut self) -> Vec<Task> {
        let mut dated: Vec<DatedTask> = self.tasks.drain().map(|(_, t)| t).collect();
        dated.sort_by_key(|t| (t.scheduled_at, t.seq));
        dated.into_iter().map(DatedTask::into_task).collect()
    }
}

impl core::fmt::Debug for TaskMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.tasks.iter()).finish()
    }
}

/// What the driver must do after a submission.
pub enum Submission {
    /// Run this task now, on the work context.
    RunNow(Task),
    /// Stored for the next flush; `replaced` is true if it displaced an older
    /// task under the same key.
    Deferred { replaced: bool },
}

impl Submission {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Submission::Deferred { .. })
    }
}

impl core::fmt::Debug for Submission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Submission::RunNow(_) => f.write_str("RunNow(..)"),
            Submission::Deferred { replaced } => f
                .debug_struct("Deferred")
                .field("replaced", replaced)
                .finish(),
        }
    }
}

/// Tasks released by one flush, primary first.
pub struct Flush {
    pub tasks: Vec<Task>,
    pub primary: usize,
    pub post: usize,
}

/// Result of one timer tick.
pub enum TickOutcome {
    /// The timer was not armed; nothing happened.
    Inactive,
    /// Nothing pending; `empty_ticks` consecutive idle ticks so far.
    Empty { empty_ticks: u32 },
    /// Idle threshold reached; the timer was released.
    Disarmed,
    /// Pending work to run now.
    Flushed(Flush),
}

impl core::fmt::Debug for TickOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TickOutcome::Inactive => f.write_str("Inactive"),
            TickOutcome::Empty { empty_ticks } => f
                .debug_struct("Empty")
                .field("empty_ticks", empty_ticks)
                .finish(),
            TickOutcome::Disarmed => f.write_str("Disarmed"),
            TickOutcome::Flushed(flush) => f
                .debug_struct("Flushed")
                .field("primary", &flush.primary)
                .field("post", &flush.post)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct SchedulerCore {
    gap: Duration,
    max_empty_execution_count: u32,
    primary: TaskMap,
    post: TaskMap,
    last_execution: Option<Instant>,
    empty_ticks: u32,
    armed: bool,
    next_fire: Option<Instant>,
    next_seq: u64,
}

impl SchedulerCore {
    pub fn new(gap: Duration, max_empty_execution_count: u32) -> Self {
        Self {
            gap,
            max_empty_execution_count: max_empty_execution_count.max(1),
            primary: TaskMap::default(),
            post: TaskMap::default(),
            last_execution: None,
            empty_ticks: 0,
            armed: false,
            next_fire: None,
            next_seq: 0,
        }
    }

    pub fn gap(&self) -> Duration {
        self.gap
    }

    pub fn tick_interval(&self) -> Duration {
        self.gap.max(MIN_TICK_INTERVAL)
    }

    pub fn state(&self) -> SchedulerState {
        if self.armed {
            SchedulerState::Armed
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether a primary task is waiting for the next flush.
    pub fn has_scheduled_execution(&self) -> bool {
        !self.primary.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.primary.len()
    }

    pub fn pending_post_count(&self) -> usize {
        self.post.len()
    }

    pub fn last_execution(&self) -> Option<Instant> {
        self.last_execution
    }

    pub fn empty_ticks(&self) -> u32 {
        self.empty_ticks
    }

    /// When the next tick is due. `None` when idle, or when armed with a
    /// period past the end of the clock.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_fire
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_fire.is_some_and(|at| at <= now)
    }

    fn gap_elapsed(&self, now: Instant) -> bool {
        match self.last_execution {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.gap,
        }
    }

    fn fire_after(&self, now: Instant) -> Option<Instant> {
        now.checked_add(self.tick_interval())
    }

    fn arm(&mut self, now: Instant) {
        if !self.armed {
            self.armed = true;
            self.next_fire = self.fire_after(now);
            self.empty_ticks = 0;
        }
    }

    fn dated(&mut self, now: Instant, task: Task) -> DatedTask {
        let seq = self.next_seq;
        self.next_seq += 1;
        DatedTask {
            scheduled_at: now,
            seq,
            task,
        }
    }

    /// Primary submission. Runs immediately when a full gap has passed since
    /// the last execution; otherwise coalesces under `key`.
    pub fn schedule(&mut self, key: impl Into<String>, task: Task, now: Instant) -> Submission {
        let key = key.into();
        self.arm(now);
        if self.gap_elapsed(now) {
            self.primary.remove(&key);
            self.last_execution = Some(now);
            return Submission::RunNow(task);
        }
        let dated = self.dated(now, task);
        let replaced = self.primary.insert(key, dated).is_some();
        Submission::Deferred { replaced }
    }

    /// Post-execution submission. Runs immediately when no primary task is
    /// pending; otherwise waits for the next flush.
    pub fn schedule_post_execution(
        &mut self,
        key: impl Into<String>,
        task: Task,
        now: Instant,
    ) -> Submission {
        if !self.has_scheduled_execution() {
            return Submission::RunNow(task);
        }
        let dated = self.dated(now, task);
        let replaced = self.post.insert(key.into(), dated).is_some();
        Submission::Deferred { replaced }
    }

    /// Timer tick. The caller decides when ticks happen (normally at
    /// `next_deadline`); the next fire time is rescheduled from `now`.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if !self.armed {
            return TickOutcome::Inactive;
        }
        if self.primary.is_empty() && self.post.is_empty() {
            self.empty_ticks += 1;
            if self.empty_ticks >= self.max_empty_execution_count {
                self.armed = false;
                self.next_fire = None;
                self.empty_ticks = 0;
                return TickOutcome::Disarmed;
            }
            self.next_fire = self.fire_after(now);
            return TickOutcome::Empty {
                empty_ticks: self.empty_ticks,
            };
        }

        let mut tasks = self.primary.drain_ordered();
        let primary = tasks.len();
        tasks.extend(self.post.drain_ordered());
        let post = tasks.len() - primary;
        self.last_execution = Some(now);
        self.empty_ticks = 0;
        self.next_fire = self.fire_after(now);
        TickOutcome::Flushed(Flush {
            tasks,
            primary,
            post,
        })
    }

    /// Drop everything and return to Idle; returns how many tasks were discarded.
    pub fn reset(&mut self) -> usize {
        let dropped = self.primary.len() + self.post.len();
        self.primary = TaskMap::default();
        self.post = TaskMap::default();
        self.armed = false;
        self.next_fire = None;
        self.empty_ticks = 0;
        dropped
    }
}
