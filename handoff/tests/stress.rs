mod common;
use common::*;

use fibre_handoff::{Fairness, SynchronousQueue};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn spsc_preserves_order(mode: Fairness) {
  let q = Arc::new(SynchronousQueue::with_fairness(mode));
  let producer = {
    let q = q.clone();
    thread::spawn(move || {
      for i in 0..ITEMS_HIGH {
        q.put(i).unwrap();
      }
    })
  };

  let mut received = Vec::with_capacity(ITEMS_HIGH);
  for _ in 0..ITEMS_HIGH {
    received.push(q.take().unwrap());
  }
  producer.join().unwrap();
  assert_eq!(received, (0..ITEMS_HIGH).collect::<Vec<_>>());
}

#[test]
fn spsc_order_unfair() {
  spsc_preserves_order(Fairness::Unfair);
}

#[test]
fn spsc_order_fair() {
  spsc_preserves_order(Fairness::Fair);
}

fn mpmc_no_loss_no_duplicates(mode: Fairness, producers: usize, consumers: usize) {
  let per_producer = ITEMS_HIGH / producers;
  let total = per_producer * producers;
  let q = Arc::new(SynchronousQueue::with_fairness(mode));
  let remaining = Arc::new(AtomicUsize::new(total));

  let producer_handles: Vec<_> = (0..producers)
    .map(|p| {
      let q = q.clone();
      thread::spawn(move || {
        for i in 0..per_producer {
          q.put(p * per_producer + i).unwrap();
          if i % 64 == 0 {
            thread::yield_now();
          }
        }
      })
    })
    .collect();

  let consumer_handles: Vec<_> = (0..consumers)
    .map(|_| {
      let q = q.clone();
      let remaining = remaining.clone();
      thread::spawn(move || {
        let mut got = Vec::new();
        // Claim a slot before taking so consumers never outnumber items.
        while remaining
          .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
          .is_ok()
        {
          got.push(q.take().unwrap());
        }
        got
      })
    })
    .collect();

  for h in producer_handles {
    h.join().unwrap();
  }
  let mut seen = HashSet::with_capacity(total);
  for h in consumer_handles {
    for v in h.join().unwrap() {
      assert!(seen.insert(v), "value {} delivered twice", v);
    }
  }
  assert_eq!(seen.len(), total);
  assert!((0..total).all(|v| seen.contains(&v)));
}

#[test]
fn mpmc_unfair() {
  mpmc_no_loss_no_duplicates(Fairness::Unfair, 4, 4);
}

#[test]
fn mpmc_fair() {
  mpmc_no_loss_no_duplicates(Fairness::Fair, 4, 4);
}

#[test]
fn many_producers_one_consumer() {
  for mode in BOTH_MODES {
    mpmc_no_loss_no_duplicates(mode, 8, 1);
  }
}

#[test]
fn one_producer_many_consumers() {
  for mode in BOTH_MODES {
    mpmc_no_loss_no_duplicates(mode, 1, 8);
  }
}

#[test]
fn timed_puts_against_single_consumer() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    let delivered = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4)
      .map(|_| {
        let q = q.clone();
        let delivered = delivered.clone();
        thread::spawn(move || {
          for i in 0..ITEMS_MEDIUM {
            if q.put_timeout(i, SHORT_TIMEOUT).is_ok() {
              delivered.fetch_add(1, Ordering::SeqCst);
            }
          }
        })
      })
      .collect();

    let mut received = 0;
    while received < delivered.load(Ordering::SeqCst) || producers.iter().any(|p| !p.is_finished()) {
      if q.take_timeout(SHORT_TIMEOUT).is_ok() {
        received += 1;
      }
    }
    for p in producers {
      p.join().unwrap();
    }
    assert_eq!(received, delivered.load(Ordering::SeqCst));
  }
}
