//! Gap/debounce task scheduler.
//!
//! A submitted task runs immediately when at least `gap` has passed since
//! the last execution. Otherwise it is parked under its key until the next
//! timer tick; a later submission for the same key replaces it, so a burst
//! collapses into one trailing execution of the latest task.
//! Post-execution tasks run right away when nothing is pending, or after
//! the next flush of primary tasks.
//!
//! Layers
//! - [`SchedulerCore`]: pure state machine; time is passed in and tasks are
//!   returned to the caller, never run by the core itself.
//! - [`LocalScheduler`]: drives a core on the thread that constructed it
//!   (`on_main_thread = true`). The owner pumps it from its own loop;
//!   other threads submit through a [`SchedulerHandle`].
//! - [`WorkerScheduler`]: drives a core on a private serial thread
//!   (`on_main_thread = false`); every call is marshalled onto that thread.
//! - [`Scheduler`]: picks one of the two from a [`SchedulerConfig`].
//!
//! Scheduler state is single-writer: only the work context ever touches a
//! core, so no lock protects it. Calls from elsewhere are either marshalled
//! (worker, handle) or reported through [`ContractPolicy`] (local).

pub mod clock;
pub mod listeners;
pub mod local;
pub mod machine;
pub mod worker;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use listeners::{ListenerKey, StateListeners};
pub use local::{LocalScheduler, SchedulerHandle};
pub use machine::{
    DatedTask, Flush, SchedulerCore, SchedulerState, Submission, Task, TaskMap, TickOutcome,
    DEFAULT_MAX_EMPTY_EXECUTION_COUNT, MIN_TICK_INTERVAL,
};
pub use worker::WorkerScheduler;

use crate::contract::ContractPolicy;
use crate::error::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Which pending map a submission targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TaskKind {
    Primary,
    PostExecution,
}

/// A submission travelling to a work context.
pub(crate) struct Submit {
    pub(crate) kind: TaskKind,
    pub(crate) key: String,
    pub(crate) task: Task,
}

impl Submit {
    pub(crate) fn new(kind: TaskKind, key: impl Into<String>, task: Task) -> Self {
        Self {
            kind,
            key: key.into(),
            task,
        }
    }

    pub(crate) fn apply(self, core: &mut SchedulerCore, now: std::time::Instant) -> Submission {
        match self.kind {
            TaskKind::Primary => core.schedule(self.key, self.task, now),
            TaskKind::PostExecution => core.schedule_post_execution(self.key, self.task, now),
        }
    }
}

/// Run one task on the work context. A panic is logged and contained so the
/// rest of a flush still runs; returns false if the task panicked.
pub(crate) fn run_task(task: Task) -> bool {
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => true,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("<non-string panic>"));
            tracing::error!(panic = %msg, "scheduled task panicked");
            false
        }
    }
}

/// How cross-thread submissions reach a worker scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum Marshalling {
    /// Block until the work thread has processed the submission (and run the
    /// task, if it ran immediately).
    #[default]
    Sync,
    /// Enqueue and return.
    Async,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub gap: Duration,
    pub on_main_thread: bool,
    pub max_empty_execution_count: u32,
    pub marshalling: Marshalling,
    pub contract_policy: ContractPolicy,
    pub thread_name: Option<String>,
}

impl SchedulerConfig {
    pub fn new(gap: Duration) -> Self {
        Self {
            gap,
            on_main_thread: false,
            max_empty_execution_count: DEFAULT_MAX_EMPTY_EXECUTION_COUNT,
            marshalling: Marshalling::default(),
            contract_policy: ContractPolicy::default(),
            thread_name: None,
        }
    }

    pub fn on_main_thread(mut self, on_main_thread: bool) -> Self {
        self.on_main_thread = on_main_thread;
        self
    }

    pub fn max_empty_execution_count(mut self, count: u32) -> Self {
        self.max_empty_execution_count = count;
        self
    }

    pub fn marshalling(mut self, marshalling: Marshalling) -> Self {
        self.marshalling = marshalling;
        self
    }

    pub fn contract_policy(mut self, policy: ContractPolicy) -> Self {
        self.contract_policy = policy;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub(crate) fn make_core(&self) -> SchedulerCore {
        SchedulerCore::new(self.gap, self.max_empty_execution_count)
    }

    /// Build the scheduler selected by `on_main_thread`.
    pub fn build(self) -> Result<Scheduler> {
        if self.on_main_thread {
            Ok(Scheduler::Local(LocalScheduler::new(self)))
        } else {
            WorkerScheduler::spawn(self).map(Scheduler::Worker)
        }
    }
}

/// A scheduler bound either to its constructing thread or to a private thread.
#[derive(Debug)]
pub enum Scheduler {
    Local(LocalScheduler),
    Worker(WorkerScheduler),
}

impl Scheduler {
    pub fn new(gap: Duration, on_main_thread: bool) -> Result<Self> {
        SchedulerConfig::new(gap)
            .on_main_thread(on_main_thread)
            .build()
    }

    pub fn schedule(
        &self,
        key: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        match self {
            Scheduler::Local(s) => {
                s.schedule(key, task);
                Ok(())
            }
            Scheduler::Worker(s) => s.schedule(key, task),
        }
    }

    pub fn schedule_post_execution(
        &self,
        key: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        match self {
            Scheduler::Local(s) => {
                s.schedule_post_execution(key, task);
                Ok(())
            }
            Scheduler::Worker(s) => s.schedule_post_execution(key, task),
        }
    }

    pub fn is_armed(&self) -> Result<bool> {
        match self {
            Scheduler::Local(s) => Ok(s.is_armed()),
            Scheduler::Worker(s) => s.is_armed(),
        }
    }

    pub fn has_scheduled_execution(&self) -> Result<bool> {
        match self {
            Scheduler::Local(s) => Ok(s.has_scheduled_execution()),
            Scheduler::Worker(s) => s.has_scheduled_execution(),
        }
    }

    pub fn add_state_listener(
        &self,
        listener: impl Fn(SchedulerState) + Send + Sync + 'static,
    ) -> ListenerKey {
        self.listeners().add(listener)
    }

    pub fn remove_state_listener(&self, key: ListenerKey) -> bool {
        self.listeners().remove(key)
    }

    fn listeners(&self) -> &StateListeners {
        match self {
            Scheduler::Local(s) => s.listeners(),
            Scheduler::Worker(s) => s.listeners(),
        }
    }

    pub fn as_local(&self) -> Option<&LocalScheduler> {
        match self {
            Scheduler::Local(s) => Some(s),
            Scheduler::Worker(_) => None,
        }
    }

    pub fn as_worker(&self) -> Option<&WorkerScheduler> {
        match self {
            Scheduler::Local(_) => None,
            Scheduler::Worker(s) => Some(s),
        }
    }
}
