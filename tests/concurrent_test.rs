// Copyright 2026 Skipqueue Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use skipqueue::{KvPriorityQueue, PriorityQueue};

#[test]
fn concurrent_producers_drain_sorted() {
    let threads: u64 = 8;
    let per_thread: u64 = 2_000;
    let q = Arc::new(PriorityQueue::<u64>::new());

    let mut handles = Vec::new();
    for t in 0..threads {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            // Distinct priorities across all producers.
            for i in 0..per_thread {
                q.push(i * threads + t);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(q.size() as u64, threads * per_thread);

    let mut drained = Vec::new();
    while let Some(p) = q.try_pop() {
        drained.push(p);
    }
    let expected: Vec<u64> = (0..threads * per_thread).collect();
    assert_eq!(drained, expected);
    assert_eq!(q.size(), 0);
}

#[test]
fn producer_consumer_stress() {
    const KEYS: usize = 1000;
    let producers = 4;
    let consumers = 4;
    let per_producer = 5_000;

    let q = Arc::new(PriorityQueue::<u32>::new());
    let done = Arc::new(AtomicBool::new(false));

    let mut producer_handles = Vec::new();
    for _ in 0..producers {
        let q = q.clone();
        producer_handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut bag = [0usize; KEYS];
            for _ in 0..per_producer {
                let p = rng.gen_range(0..KEYS as u32);
                bag[p as usize] += 1;
                q.push(p);
            }
            bag
        }));
    }

    let mut consumer_handles = Vec::new();
    for _ in 0..consumers {
        let q = q.clone();
        let done = done.clone();
        consumer_handles.push(thread::spawn(move || {
            let mut got = [0usize; KEYS];
            loop {
                match q.try_pop() {
                    Some(p) => got[p as usize] += 1,
                    None => {
                        if done.load(Ordering::SeqCst) {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            }
            got
        }));
    }

    let mut inserted = [0usize; KEYS];
    for h in producer_handles {
        let bag = h.join().unwrap();
        for (i, n) in bag.iter().enumerate() {
            inserted[i] += n;
        }
    }
    done.store(true, Ordering::SeqCst);

    let mut removed = [0usize; KEYS];
    for h in consumer_handles {
        let got = h.join().unwrap();
        for (i, n) in got.iter().enumerate() {
            removed[i] += n;
        }
    }
    // A consumer may bail out on a transient None while entries remain;
    // whatever is left is drained here and counted too.
    while let Some(p) = q.try_pop() {
        removed[p as usize] += 1;
    }

    assert_eq!(inserted, removed);
    assert!(q.try_pop().is_none());
}

#[test]
fn bounded_queue_admission() {
    let q = Arc::new(PriorityQueue::<u32>::bounded(2));
    q.push(10);
    q.push(20);

    let popped = Arc::new(AtomicBool::new(false));
    let consumer = {
        let q = q.clone();
        let popped = popped.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            popped.store(true, Ordering::SeqCst);
            let p = loop {
                if let Some(p) = q.try_pop() {
                    break p;
                }
            };
            assert_eq!(p, 10);
        })
    };

    // The queue is full, so this returns only after the consumer's pop.
    q.push(30);
    assert!(popped.load(Ordering::SeqCst));
    consumer.join().unwrap();

    let mut rest = Vec::new();
    while let Some(p) = q.try_pop() {
        rest.push(p);
    }
    assert_eq!(rest, vec![20, 30]);
}

#[test]
fn kv_concurrent_payloads_match() {
    let threads: u64 = 4;
    let per_thread: u64 = 2_000;
    let q = Arc::new(KvPriorityQueue::<u64, u64>::new());

    let mut handles = Vec::new();
    for t in 0..threads {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let k = i * threads + t;
                q.push(k, k * 31);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let mut last = None;
    let mut count = 0u64;
    while let Some((k, v)) = q.try_pop() {
        assert_eq!(v, k * 31);
        if let Some(prev) = last {
            assert!(prev <= k);
        }
        last = Some(k);
        count += 1;
    }
    assert_eq!(count, threads * per_thread);
}

#[test]
fn mixed_push_pop_then_drain() {
    let q = Arc::new(PriorityQueue::<u32>::new());
    let mut handles = Vec::new();
    for t in 0..4u32 {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            let mut popped = 0usize;
            for i in 0..4_000u32 {
                q.push(i.rotate_left(t) % 10_000);
                if i % 3 == 0 && q.try_pop().is_some() {
                    popped += 1;
                }
            }
            popped
        }));
    }
    let popped: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let mut remaining = 0usize;
    let mut last = 0u32;
    while let Some(p) = q.try_pop() {
        assert!(last <= p);
        last = p;
        remaining += 1;
    }
    assert_eq!(popped + remaining, 4 * 4_000);
}
