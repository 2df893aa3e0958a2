//! WorkerScheduler: a scheduler whose work context is a private serial thread.
//!
//! The thread owns the [`SchedulerCore`] outright; every public call is a
//! message on a crossbeam channel. Timer ticks are the thread's own
//! `recv_deadline` timeouts, so an idle scheduler blocks in `recv` and costs
//! nothing.
//!
//! Marshalling
//! - `Sync` (default): the caller blocks until the worker processed the
//!   submission, including running the task if it ran immediately.
//! - `Async`: the caller enqueues and returns.
//! - Submissions made from the worker thread itself (from inside a task) are
//!   always enqueued without waiting, so a task can resubmit work.
//!
//! Queries (`is_armed`, `pending_count`, ...) round-trip through the worker
//! and fail with [`Error::Reentrant`] when called from inside a task.
//!
//! Dropping the scheduler closes the channel; the worker discards pending
//! tasks and exits, and the drop joins it unless it happens on the worker.

use super::listeners::{ListenerKey, StateListeners};
use super::machine::{SchedulerCore, SchedulerState, Submission, TickOutcome};
use super::{run_task, Marshalling, SchedulerConfig, Submit, TaskKind};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;
use tracing::{debug, error, trace};

type Query = Box<dyn FnOnce(&SchedulerCore) + Send + 'static>;

enum Command {
    Submit {
        submit: Submit,
        ack: Option<Sender<()>>,
    },
    Query(Query),
}

pub struct WorkerScheduler {
    tx: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    marshalling: Marshalling,
    listeners: Arc<StateListeners>,
}

impl WorkerScheduler {
    pub fn spawn(config: SchedulerConfig) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let listeners = Arc::new(StateListeners::new());
        let name = config
            .thread_name
            .clone()
            .unwrap_or_else(|| String::from("rw-guard-scheduler"));
        let work = WorkLoop {
            core: config.make_core(),
            rx,
            listeners: Arc::clone(&listeners),
        };
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || work.run())?;
        debug!(name = %name, gap = ?config.gap, "scheduler worker spawned");
        Ok(Self {
            tx: Some(tx),
            thread_id: thread.thread().id(),
            thread: Some(thread),
            marshalling: config.marshalling,
            listeners,
        })
    }

    pub fn marshalling(&self) -> Marshalling {
        self.marshalling
    }

    /// Whether the caller is running on the worker thread.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn schedule(
        &self,
        key: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.submit(Submit::new(TaskKind::Primary, key, Box::new(task)))
    }

    pub fn schedule_post_execution(
        &self,
        key: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.submit(Submit::new(TaskKind::PostExecution, key, Box::new(task)))
    }

    fn submit(&self, submit: Submit) -> Result<()> {
        let wait = self.marshalling == Marshalling::Sync && !self.is_worker_thread();
        if !wait {
            return self.send(Command::Submit { submit, ack: None });
        }
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.send(Command::Submit {
            submit,
            ack: Some(ack_tx),
        })?;
        ack_rx.recv().map_err(|_| Error::Closed)
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or(Error::Closed)?
            .send(cmd)
            .map_err(|_| Error::Closed)
    }

    /// Run `f` against the core on the worker thread and return its result.
    pub fn query<R: Send + 'static>(
        &self,
        f: impl FnOnce(&SchedulerCore) -> R + Send + 'static,
    ) -> Result<R> {
        if self.is_worker_thread() {
            return Err(Error::Reentrant);
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(Command::Query(Box::new(move |core| {
            let _ = tx.send(f(core));
        })))?;
        rx.recv().map_err(|_| Error::Closed)
    }

    /// Block until every command sent before this call was processed.
    pub fn flush(&self) -> Result<()> {
        self.query(|_| ())
    }

    pub fn state(&self) -> Result<SchedulerState> {
        self.query(SchedulerCore::state)
    }

    pub fn is_armed(&self) -> Result<bool> {
        self.query(SchedulerCore::is_armed)
    }

    pub fn has_scheduled_execution(&self) -> Result<bool> {
        self.query(SchedulerCore::has_scheduled_execution)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.query(SchedulerCore::pending_count)
    }

    pub fn pending_post_count(&self) -> Result<usize> {
        self.query(SchedulerCore::pending_post_count)
    }

    /// Listeners are called on the worker thread.
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

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        drop(self.tx.take());
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.is_worker_thread() {
            // Dropped from inside a task; the loop exits on its own.
            return;
        }
        if thread.join().is_err() {
            error!("scheduler worker terminated by panic");
        }
    }
}

impl core::fmt::Debug for WorkerScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerScheduler")
            .field("thread", &self.thread_id)
            .field("marshalling", &self.marshalling)
            .finish_non_exhaustive()
    }
}

struct WorkLoop {
    core: SchedulerCore,
    rx: Receiver<Command>,
    listeners: Arc<StateListeners>,
}

impl WorkLoop {
    fn run(mut self) {
        loop {
            if self.core.is_due(Instant::now()) {
                self.tick();
                continue;
            }
            let cmd = match self.core.next_deadline() {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };
            self.handle(cmd);
        }
        let dropped = self.core.reset();
        debug!(dropped, "scheduler worker stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { submit, ack } => {
                let before = self.core.state();
                let submission = submit.apply(&mut self.core, Instant::now());
                self.listeners.transition(before, self.core.state());
                match submission {
                    Submission::RunNow(task) => {
                        run_task(task);
                    }
                    Submission::Deferred { replaced } => trace!(replaced, "task deferred"),
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Query(query) => query(&self.core),
        }
    }

    fn tick(&mut self) {
        let before = self.core.state();
        let outcome = self.core.tick(Instant::now());
        self.listeners.transition(before, self.core.state());
        match outcome {
            TickOutcome::Flushed(flush) => {
                trace!(primary = flush.primary, post = flush.post, "flushing");
                for task in flush.tasks {
                    run_task(task);
                }
            }
            TickOutcome::Disarmed => debug!("idle threshold reached; timer released"),
            TickOutcome::Empty { .. } | TickOutcome::Inactive => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protected::ThreadSafe;
    use std::time::Duration;

    fn worker(gap_ms: u64) -> WorkerScheduler {
        WorkerScheduler::spawn(SchedulerConfig::new(Duration::from_millis(gap_ms))).unwrap()
    }

    /// Invariant: with sync marshalling an immediate task has run when
    /// `schedule` returns.
    #[test]
    fn sync_marshalling_runs_before_return() {
        let s = worker(1_000);
        let hit = Arc::new(ThreadSafe::new(false));
        let h = Arc::clone(&hit);
        s.schedule("a", move || h.set(true)).unwrap();
        assert!(hit.get());
        assert!(s.is_armed().unwrap());
    }

    #[test]
    fn tasks_run_on_the_worker_thread() {
        let s = WorkerScheduler::spawn(
            SchedulerConfig::new(Duration::from_millis(10)).thread_name("sched-test"),
        )
        .unwrap();
        let name = Arc::new(ThreadSafe::new(None::<String>));
        let n = Arc::clone(&name);
        s.schedule("a", move || n.set(thread::current().name().map(str::to_owned)))
            .unwrap();
        assert_eq!(name.get().as_deref(), Some("sched-test"));
    }

    /// Invariant: a panicking task does not take the worker down.
    #[test]
    fn panicking_task_is_contained() {
        let s = worker(0);
        s.schedule("boom", || panic!("boom")).unwrap();
        let hit = Arc::new(ThreadSafe::new(false));
        let h = Arc::clone(&hit);
        s.schedule("after", move || h.set(true)).unwrap();
        assert!(hit.get());
    }

    /// Invariant: queries from inside a task fail instead of deadlocking,
    /// and resubmission from a task is accepted.
    #[test]
    fn reentrant_calls_from_task() {
        let s = Arc::new(worker(0));
        let seen = Arc::new(ThreadSafe::new(None));
        let (s2, seen2) = (Arc::clone(&s), Arc::clone(&seen));
        s.schedule("outer", move || {
            let q = s2.is_armed();
            let resubmit = s2.schedule("inner", || {});
            seen2.set(Some((matches!(q, Err(Error::Reentrant)), resubmit.is_ok())));
        })
        .unwrap();
        s.flush().unwrap();
        assert_eq!(seen.get(), Some((true, true)));
    }

    #[test]
    fn async_marshalling_is_observed_after_flush() {
        let s = WorkerScheduler::spawn(
            SchedulerConfig::new(Duration::from_millis(5)).marshalling(Marshalling::Async),
        )
        .unwrap();
        let count = Arc::new(ThreadSafe::new(0));
        let c = Arc::clone(&count);
        s.schedule("a", move || c.update(|v| *v += 1)).unwrap();
        s.flush().unwrap();
        assert_eq!(count.get(), 1);
    }

    /// Invariant: a gap too large for the clock neither panics the worker
    /// nor closes the scheduler.
    #[test]
    fn huge_gap_keeps_worker_alive() {
        let s = WorkerScheduler::spawn(SchedulerConfig::new(Duration::MAX)).unwrap();
        let count = Arc::new(ThreadSafe::new(0));
        for _ in 0..2 {
            let c = Arc::clone(&count);
            s.schedule("a", move || c.update(|v| *v += 1)).unwrap();
        }
        assert_eq!(count.get(), 1);
        assert!(s.is_armed().unwrap());
        assert_eq!(s.pending_count().unwrap(), 1);
    }

    #[test]
    fn drop_joins_worker() {
        let s = worker(10);
        s.schedule("a", || {}).unwrap();
        s.schedule("b", || {}).unwrap();
        drop(s);
    }
}
