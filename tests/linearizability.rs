use rw_guard::{ProtectedValue, ThreadSafeList, ThreadSafeMap, WriteQueue};
use std::sync::Arc;
use std::thread;

/// Invariant: N threads, each doing a single `write` increment, sum to N.
#[test]
fn one_increment_per_thread() {
    for n in [1usize, 100, 10_000] {
        let pv = ProtectedValue::new(0usize);
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let pv = pv.clone();
                thread::Builder::new()
                    .stack_size(64 * 1024)
                    .spawn(move || pv.write(|v| *v += 1))
                    .unwrap()
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pv.get(), n);
    }
}

/// Invariant: readers never observe a half-applied write.
#[test]
fn readers_see_whole_writes() {
    let pv = ProtectedValue::new((0u64, 0u64));
    let writer = {
        let pv = pv.clone();
        thread::spawn(move || {
            for i in 1..=5_000u64 {
                pv.write(|(a, b)| {
                    *a = i;
                    *b = i * 2;
                });
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let pv = pv.clone();
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let (a, b) = pv.get();
                    assert_eq!(b, a * 2);
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
}

#[test]
fn map_counters_under_contention() {
    let m = Arc::new(ThreadSafeMap::<u8, u32>::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for i in 0..1_000u32 {
                    let key = (i % 4) as u8;
                    m.write(|map| *map.entry(key).or_insert(0) += 1);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(m.values().iter().sum::<u32>(), 8_000);
    assert!(m.values().iter().all(|&v| v == 2_000));
}

#[test]
fn list_appends_from_many_threads() {
    let l = Arc::new(ThreadSafeList::<usize>::default());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let l = Arc::clone(&l);
            thread::spawn(move || {
                for i in 0..250 {
                    l.append(t * 1_000 + i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let mut all = l.entries();
    assert_eq!(all.len(), 2_000);
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 2_000);
}

/// Invariant: async writes from several producers on one queue all land;
/// each producer's own writes keep their order.
#[test]
fn async_writes_from_many_threads() {
    let queue = WriteQueue::spawn("lin-async").unwrap();
    let log = ProtectedValue::with_queue(Vec::new(), queue.clone());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let log = log.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    log.write_async(move |v: &mut Vec<(usize, usize)>| v.push((t, i)));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    queue.flush().unwrap();
    let entries = log.get();
    assert_eq!(entries.len(), 800);
    for t in 0..4 {
        let mine: Vec<usize> = entries.iter().filter(|e| e.0 == t).map(|e| e.1).collect();
        assert_eq!(mine, (0..200).collect::<Vec<_>>());
    }
}
