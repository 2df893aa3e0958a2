//! LocalScheduler: a scheduler whose work context is the constructing thread.
//!
//! The owner thread drives the timer by calling [`LocalScheduler::pump`] (or
//! [`LocalScheduler::run_for`]) from its own loop. Nothing runs behind the
//! owner's back: immediate tasks run inside `schedule`, deferred ones inside
//! `pump` once the next tick is due. A panicking task is logged and does not
//! unwind into the caller or cost the rest of its flush.
//!
//! Other threads never touch the core. They hold a [`SchedulerHandle`] and
//! send submissions into an inbox that the owner drains on its next pump.
//! Calling `schedule` directly from a foreign thread is a contract
//! violation reported through [`ContractPolicy`]; `LocalScheduler` is
//! `Send` but not `Sync`, so this can only happen after the scheduler was
//! moved.

use super::clock::{Clock, MonotonicClock};
use super::listeners::{ListenerKey, StateListeners};
use super::machine::{SchedulerCore, SchedulerState, Submission, TickOutcome};
use super::{run_task, SchedulerConfig, Submit, TaskKind};
use crate::contract::{ContractPolicy, FlushGuard, ThreadAffinity};
use crate::error::{Error, Result};
use core::cell::RefCell;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub struct LocalScheduler {
    core: RefCell<SchedulerCore>,
    affinity: ThreadAffinity,
    flush_guard: FlushGuard,
    clock: Arc<dyn Clock>,
    inbox_tx: Sender<Submit>,
    inbox: Receiver<Submit>,
    listeners: Arc<StateListeners>,
}

impl LocalScheduler {
    /// Bind a scheduler to the calling thread, timed by the monotonic clock.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let (inbox_tx, inbox) = crossbeam_channel::unbounded();
        debug!(gap = ?config.gap, "local scheduler created");
        Self {
            core: RefCell::new(config.make_core()),
            affinity: ThreadAffinity::current(config.contract_policy),
            flush_guard: FlushGuard::new(),
            clock,
            inbox_tx,
            inbox,
            listeners: Arc::new(StateListeners::new()),
        }
    }

    fn policy(&self) -> ContractPolicy {
        self.affinity.policy()
    }

    /// Submit a primary task. Runs it before returning if the gap has
    /// elapsed; otherwise it replaces any pending task under `key`.
    #[track_caller]
    pub fn schedule(&self, key: impl Into<String>, task: impl FnOnce() + Send + 'static) {
        self.affinity.check("schedule");
        self.submit(Submit::new(TaskKind::Primary, key, Box::new(task)));
    }

    /// Submit a task to run after the next flush of primary tasks, or now
    /// if none is pending.
    #[track_caller]
    pub fn schedule_post_execution(
        &self,
        key: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) {
        self.affinity.check("schedule_post_execution");
        self.submit(Submit::new(TaskKind::PostExecution, key, Box::new(task)));
    }

    /// A cloneable, `Send` submitter for other threads.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.inbox_tx.clone(),
        }
    }

    /// Drain submissions from handles, then run one tick if it is due.
    /// Returns the number of tasks executed.
    ///
    /// Must not be called from inside a scheduled task.
    #[track_caller]
    pub fn pump(&self) -> usize {
        self.affinity.check("pump");
        if self.flush_guard.is_flushing() {
            self.policy()
                .violated("pump", "called from inside a running flush");
            return 0;
        }
        let mut ran = 0;
        while let Ok(submit) = self.inbox.try_recv() {
            ran += self.submit(submit);
        }
        let now = self.clock.now();
        if self.core.borrow().is_due(now) {
            ran += self.tick(now);
        }
        ran
    }

    /// Pump repeatedly for `duration` of real time, sleeping until the next
    /// tick or submission in between. Returns the number of tasks executed.
    pub fn run_for(&self, duration: Duration) -> usize {
        let start = Instant::now();
        let mut ran = 0;
        loop {
            ran += self.pump();
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return ran;
            }
            let mut wait = duration - elapsed;
            if let Some(deadline) = self.core.borrow().next_deadline() {
                wait = wait.min(deadline.saturating_duration_since(self.clock.now()));
            }
            match self.inbox.recv_timeout(wait) {
                Ok(submit) => ran += self.submit(submit),
                Err(RecvTimeoutError::Timeout) => {}
                // `inbox_tx` lives as long as `self`.
                Err(RecvTimeoutError::Disconnected) => return ran,
            }
        }
    }

    fn submit(&self, submit: Submit) -> usize {
        let now = self.clock.now();
        let (submission, before, after) = {
            let mut core = self.core.borrow_mut();
            let before = core.state();
            let submission = submit.apply(&mut core, now);
            (submission, before, core.state())
        };
        self.listeners.transition(before, after);
        match submission {
            Submission::RunNow(task) => {
                trace!("running task immediately");
                run_task(task);
                1
            }
            Submission::Deferred { replaced } => {
                trace!(replaced, "task deferred");
                0
            }
        }
    }

    fn tick(&self, now: Instant) -> usize {
        let (outcome, before, after) = {
            let mut core = self.core.borrow_mut();
            let before = core.state();
            let outcome = core.tick(now);
            (outcome, before, core.state())
        };
        self.listeners.transition(before, after);
        match outcome {
            TickOutcome::Flushed(flush) => {
                let _token = self.flush_guard.enter(self.policy());
                trace!(primary = flush.primary, post = flush.post, "flushing");
                let n = flush.tasks.len();
                for task in flush.tasks {
                    run_task(task);
                }
                n
            }
            TickOutcome::Disarmed => {
                debug!("idle threshold reached; timer released");
                0
            }
            TickOutcome::Empty { .. } | TickOutcome::Inactive => 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.core.borrow().state()
    }

    pub fn is_armed(&self) -> bool {
        self.core.borrow().is_armed()
    }

    pub fn has_scheduled_execution(&self) -> bool {
        self.core.borrow().has_scheduled_execution()
    }

    pub fn pending_count(&self) -> usize {
        self.core.borrow().pending_count()
    }

    pub fn pending_post_count(&self) -> usize {
        self.core.borrow().pending_post_count()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.core.borrow().next_deadline()
    }

    pub fn gap(&self) -> Duration {
        self.core.borrow().gap()
    }

    pub fn add_state_listener(
        &self,
        listener: impl Fn(SchedulerState) + Send + Sync + 'static,
    ) -> ListenerKey {
        self.listeners.add(listener)
    }

    pub fn remove_state_listener(&self, key: ListenerKey) -> bool {
        self.listeners.remove(key)
    }

    pub(crate) fn listeners(&self) -> &StateListeners {
        &self.listeners
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        let dropped = self.core.get_mut().reset();
        if dropped > 0 {
            debug!(dropped, "local scheduler dropped with pending tasks");
        }
    }
}

impl core::fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut d = f.debug_struct("LocalScheduler");
        match self.core.try_borrow() {
            Ok(core) => d
                .field("state", &core.state())
                .field("pending", &core.pending_count())
                .field("pending_post", &core.pending_post_count()),
            Err(_) => d.field("core", &"<borrowed>"),
        };
        d.field("owner", &self.affinity.owner()).finish()
    }
}

/// Cross-thread submitter for a [`LocalScheduler`].
///
/// Submissions are queued and applied, in order, the next time the owner
/// pumps. Fails with [`Error::Closed`] once the scheduler is dropped.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    tx: Sender<Submit>,
}

impl SchedulerHandle {
    pub fn schedule(
        &self,
        key: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.send(Submit::new(TaskKind::Primary, key, Box::new(task)))
    }

    pub fn schedule_post_execution(
        &self,
        key: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.send(Submit::new(TaskKind::PostExecution, key, Box::new(task)))
    }

    fn send(&self, submit: Submit) -> Result<()> {
        self.tx.send(submit).map_err(|_| Error::Closed)
    }
}
