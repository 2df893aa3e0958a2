use rw_guard::scheduler::{Clock, ManualClock};
use rw_guard::{
    ContractPolicy, LocalScheduler, Marshalling, Scheduler, SchedulerConfig, SchedulerState,
    ThreadSafe,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const GAP: Duration = Duration::from_millis(100);

type Log = Arc<ThreadSafe<Vec<String>>>;

fn log() -> Log {
    Arc::new(ThreadSafe::new(Vec::new()))
}

fn record(log: &Log, name: &str) -> impl FnOnce() + Send + 'static {
    let (log, name) = (Arc::clone(log), name.to_string());
    move || log.update(|v| v.push(name))
}

fn local(clock: &ManualClock) -> LocalScheduler {
    let config = SchedulerConfig::new(GAP)
        .on_main_thread(true)
        .contract_policy(ContractPolicy::Panic);
    LocalScheduler::with_clock(config, Arc::new(clock.clone()))
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// t1 at 0 runs immediately; t2 at 20ms and t3 at 50ms under the same key
/// collapse to one run of t3 at the next tick.
#[test]
fn burst_runs_first_and_latest() {
    let clock = ManualClock::new();
    let s = local(&clock);
    let log = log();

    s.schedule("k", record(&log, "t1"));
    clock.advance(ms(20));
    s.schedule("k", record(&log, "t2"));
    clock.advance(ms(30));
    s.schedule("k", record(&log, "t3"));
    assert_eq!(log.get(), vec!["t1"]);
    assert!(s.has_scheduled_execution());

    clock.advance(ms(50));
    assert_eq!(s.pump(), 1);
    assert_eq!(log.get(), vec!["t1", "t3"]);
    assert!(!s.has_scheduled_execution());
}

/// Different keys are independent and each runs once at the flush, in
/// submission order.
#[test]
fn distinct_keys_flush_in_submission_order() {
    let clock = ManualClock::new();
    let s = local(&clock);
    let log = log();

    s.schedule("warmup", record(&log, "w"));
    for (i, key) in ["c", "a", "b"].into_iter().enumerate() {
        clock.advance(ms(10));
        s.schedule(key, record(&log, &format!("{key}{i}")));
    }
    clock.advance(ms(70));
    assert_eq!(s.pump(), 3);
    assert_eq!(log.get(), vec!["w", "c0", "a1", "b2"]);
}

#[test]
fn post_execution_after_pending_primary() {
    let clock = ManualClock::new();
    let s = local(&clock);
    let log = log();

    s.schedule_post_execution("p0", record(&log, "p0"));
    assert_eq!(log.get(), vec!["p0"], "nothing pending: runs now");

    s.schedule("k", record(&log, "a"));
    clock.advance(ms(10));
    s.schedule("k", record(&log, "b"));
    s.schedule_post_execution("p1", record(&log, "p1"));
    s.schedule_post_execution("p1", record(&log, "p1-latest"));
    assert_eq!(s.pending_post_count(), 1);

    clock.advance(GAP);
    s.pump();
    assert_eq!(log.get(), vec!["p0", "a", "b", "p1-latest"]);
}

/// The timer tears down after five idle ticks and re-arms on the next
/// submission, which runs immediately.
#[test]
fn idle_teardown_then_rearm() {
    let clock = ManualClock::new();
    let s = local(&clock);
    let log = log();
    let states = Arc::new(ThreadSafe::new(Vec::new()));
    let st = Arc::clone(&states);
    s.add_state_listener(move |state| st.update(|v| v.push(state)));

    s.schedule("k", record(&log, "first"));
    for _ in 0..4 {
        clock.advance(GAP);
        s.pump();
        assert!(s.is_armed());
    }
    clock.advance(GAP);
    s.pump();
    assert!(!s.is_armed());
    assert_eq!(s.state(), SchedulerState::Idle);

    s.schedule("k", record(&log, "second"));
    assert!(s.is_armed());
    assert_eq!(log.get(), vec!["first", "second"]);
    assert_eq!(
        states.get(),
        vec![
            SchedulerState::Armed,
            SchedulerState::Idle,
            SchedulerState::Armed
        ]
    );
}

#[test]
fn custom_idle_threshold() {
    let clock = ManualClock::new();
    let config = SchedulerConfig::new(GAP)
        .max_empty_execution_count(2)
        .contract_policy(ContractPolicy::Panic);
    let s = LocalScheduler::with_clock(config, Arc::new(clock.clone()));
    s.schedule("k", || {});
    clock.advance(GAP);
    s.pump();
    assert!(s.is_armed());
    clock.advance(GAP);
    s.pump();
    assert!(!s.is_armed());
}

#[test]
fn removed_listener_is_not_called() {
    let clock = ManualClock::new();
    let s = local(&clock);
    let calls = Arc::new(ThreadSafe::new(0));
    let c = Arc::clone(&calls);
    let key = s.add_state_listener(move |_| c.update(|n| *n += 1));
    assert!(s.remove_state_listener(key));
    s.schedule("k", || {});
    assert_eq!(calls.get(), 0);
}

/// Handles submit from other threads; the owner applies them on its loop.
#[test]
fn handle_feeds_owner_loop() {
    let clock = ManualClock::new();
    let s = local(&clock);
    let log = log();
    let handle = s.handle();

    let producers: Vec<_> = (0..4)
        .map(|t| {
            let (h, log) = (handle.clone(), Arc::clone(&log));
            thread::spawn(move || {
                for i in 0..10 {
                    h.schedule("shared", record(&log, &format!("{t}-{i}"))).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    s.pump();
    clock.advance(GAP);
    s.pump();
    // One immediate run plus one coalesced trailing run.
    assert_eq!(log.get().len(), 2);
}

/// Real time: a local scheduler driven by `run_for` fires its trailing run.
#[test]
fn run_for_drives_real_timer() {
    let s = SchedulerConfig::new(ms(20))
        .on_main_thread(true)
        .build()
        .unwrap();
    let local = s.as_local().unwrap();
    let log = log();
    local.schedule("k", record(&log, "a"));
    local.schedule("k", record(&log, "b"));
    let ran = local.run_for(ms(80));
    assert_eq!(ran, 1);
    assert_eq!(log.get(), vec!["a", "b"]);
}

/// Real time: a worker scheduler coalesces a burst to one trailing run.
#[test]
fn worker_coalesces_burst() {
    let s = Scheduler::new(ms(50), false).unwrap();
    let log = log();
    for i in 0..5 {
        s.schedule("k", record(&log, &format!("t{i}"))).unwrap();
    }
    assert_eq!(log.get(), vec!["t0"]);
    assert!(s.has_scheduled_execution().unwrap());

    let deadline = Instant::now() + Duration::from_secs(2);
    while log.get().len() < 2 && Instant::now() < deadline {
        thread::sleep(ms(5));
    }
    assert_eq!(log.get(), vec!["t0", "t4"]);
    assert!(!s.has_scheduled_execution().unwrap());
}

#[test]
fn worker_post_execution_follows_flush() {
    let s = Scheduler::new(ms(40), false).unwrap();
    let log = log();
    s.schedule("k", record(&log, "a")).unwrap();
    s.schedule("k", record(&log, "b")).unwrap();
    s.schedule_post_execution("p", record(&log, "p")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while log.get().len() < 3 && Instant::now() < deadline {
        thread::sleep(ms(5));
    }
    assert_eq!(log.get(), vec!["a", "b", "p"]);
}

#[test]
fn worker_listener_runs_on_worker_thread() {
    let s = SchedulerConfig::new(ms(10))
        .thread_name("listener-worker")
        .marshalling(Marshalling::Sync)
        .build()
        .unwrap();
    let seen = Arc::new(ThreadSafe::new(Vec::new()));
    let sn = Arc::clone(&seen);
    s.add_state_listener(move |state| {
        let name = thread::current().name().map(str::to_owned);
        sn.update(|v| v.push((state, name)));
    });
    s.schedule("k", || {}).unwrap();
    assert_eq!(
        seen.get(),
        vec![(SchedulerState::Armed, Some("listener-worker".to_string()))]
    );
}

#[test]
fn manual_clock_drives_time() {
    let clock = ManualClock::new();
    let start = clock.now();
    clock.advance(ms(250));
    assert_eq!(clock.now() - start, ms(250));
}
