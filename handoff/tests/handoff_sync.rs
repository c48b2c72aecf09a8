mod common;
use common::*;

use fibre_handoff::{
  interrupt, Fairness, PutError, PutTimeoutError, SynchronousQueue, TakeError, TakeTimeoutError, TryPutError,
  TryTakeError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

struct DropCounter(Arc<AtomicUsize>);
impl Drop for DropCounter {
  fn drop(&mut self) {
    self.0.fetch_add(1, Ordering::SeqCst);
  }
}

fn spawn_put<T: Send + 'static>(q: &Arc<SynchronousQueue<T>>, item: T) -> thread::JoinHandle<Result<(), PutError<T>>> {
  let q = q.clone();
  thread::spawn(move || q.put(item))
}

fn spawn_take<T: Send + 'static>(q: &Arc<SynchronousQueue<T>>) -> thread::JoinHandle<Result<T, TakeError>> {
  let q = q.clone();
  thread::spawn(move || q.take())
}

#[test]
fn put_blocks_until_taken() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    let done = Arc::new(AtomicUsize::new(0));
    let putter = {
      let q = q.clone();
      let done = done.clone();
      thread::spawn(move || {
        q.put(5).unwrap();
        done.store(1, Ordering::SeqCst);
      })
    };
    thread::sleep(SHORT_TIMEOUT);
    assert_eq!(done.load(Ordering::SeqCst), 0, "put returned without a taker");
    assert_eq!(q.take().unwrap(), 5);
    putter.join().unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 1);
  }
}

#[test]
fn take_blocks_until_put() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    let taker = spawn_take(&q);
    thread::sleep(SETTLE);
    assert!(!taker.is_finished());
    q.put("payload").unwrap();
    assert_eq!(taker.join().unwrap().unwrap(), "payload");
  }
}

#[test]
fn fair_queue_pairs_waiting_puts_in_arrival_order() {
  let q = Arc::new(SynchronousQueue::with_fairness(Fairness::Fair));
  let a = spawn_put(&q, 'a');
  thread::sleep(SETTLE);
  let b = spawn_put(&q, 'b');
  thread::sleep(SETTLE);
  let c = spawn_put(&q, 'c');
  thread::sleep(SETTLE);

  assert_eq!(q.take().unwrap(), 'a');
  assert_eq!(q.take().unwrap(), 'b');
  assert_eq!(q.take().unwrap(), 'c');
  for h in [a, b, c] {
    h.join().unwrap().unwrap();
  }
}

#[test]
fn fair_queue_serves_waiting_takes_in_arrival_order() {
  let q = Arc::new(SynchronousQueue::with_fairness(Fairness::Fair));
  let first = spawn_take(&q);
  thread::sleep(SETTLE);
  let second = spawn_take(&q);
  thread::sleep(SETTLE);

  q.put(1).unwrap();
  q.put(2).unwrap();
  assert_eq!(first.join().unwrap().unwrap(), 1);
  assert_eq!(second.join().unwrap().unwrap(), 2);
}

#[test]
fn unfair_queue_pairs_newest_waiter_first() {
  let q = Arc::new(SynchronousQueue::with_fairness(Fairness::Unfair));
  let a = spawn_put(&q, 'a');
  thread::sleep(SETTLE);
  let b = spawn_put(&q, 'b');
  thread::sleep(SETTLE);

  assert_eq!(q.take().unwrap(), 'b');
  assert_eq!(q.take().unwrap(), 'a');
  a.join().unwrap().unwrap();
  b.join().unwrap().unwrap();
}

#[test]
fn put_opt_rejects_none() {
  for mode in BOTH_MODES {
    let q = SynchronousQueue::<u32>::with_fairness(mode);
    let err = q.put_opt(None).unwrap_err();
    assert_eq!(err, PutError::InvalidArgument);
    assert_eq!(err.into_inner(), None);
    assert_eq!(q.try_take(), Err(TryTakeError::NoPutter));
  }
}

#[test]
fn put_opt_some_behaves_like_put() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    let taker = spawn_take(&q);
    q.put_opt(Some(3u8)).unwrap();
    assert_eq!(taker.join().unwrap().unwrap(), 3);
  }
}

#[test]
fn try_put_succeeds_only_with_waiting_taker() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    assert_eq!(q.try_put(1), Err(TryPutError::NoTaker(1)));

    let taker = spawn_take(&q);
    let start = Instant::now();
    let mut item = 2;
    loop {
      match q.try_put(item) {
        Ok(()) => break,
        Err(e) => item = e.into_inner(),
      }
      assert!(start.elapsed() < LONG_TIMEOUT);
      thread::yield_now();
    }
    assert_eq!(taker.join().unwrap().unwrap(), 2);
  }
}

#[test]
fn try_take_succeeds_only_with_waiting_putter() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    assert_eq!(q.try_take(), Err(TryTakeError::NoPutter));
    let putter = spawn_put(&q, "v");
    thread::sleep(SETTLE);
    assert_eq!(q.try_take(), Ok("v"));
    putter.join().unwrap().unwrap();
    assert_eq!(q.try_take(), Err(TryTakeError::NoPutter));
  }
}

#[test]
fn timed_calls_succeed_when_counterpart_arrives() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    let putter = {
      let q = q.clone();
      thread::spawn(move || {
        thread::sleep(SETTLE);
        q.put_timeout(11, LONG_TIMEOUT)
      })
    };
    assert_eq!(q.take_timeout(LONG_TIMEOUT), Ok(11));
    assert_eq!(putter.join().unwrap(), Ok(()));
  }
}

#[test]
fn timed_calls_expire_and_leave_queue_usable() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    let start = Instant::now();
    assert_eq!(q.take_timeout(SHORT_TIMEOUT), Err(TakeTimeoutError::Timeout));
    assert!(start.elapsed() >= SHORT_TIMEOUT);
    assert_eq!(
      q.put_timeout(7, SHORT_TIMEOUT),
      Err(PutTimeoutError::Timeout(7))
    );

    let taker = spawn_take(&q);
    q.put(8).unwrap();
    assert_eq!(taker.join().unwrap().unwrap(), 8);
  }
}

#[test]
fn interrupted_take_is_cancelled_and_queue_stays_usable() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::<u32>::with_fairness(mode));
    let (tx, rx) = mpsc::channel();
    let taker = {
      let q = q.clone();
      thread::spawn(move || {
        tx.send(interrupt::current()).unwrap();
        let res = q.take();
        (res, interrupt::is_interrupted())
      })
    };
    let handle = rx.recv().unwrap();
    thread::sleep(SETTLE);
    handle.interrupt();

    let (res, flagged) = taker.join().unwrap();
    assert_eq!(res, Err(TakeError::Interrupted));
    assert!(!flagged, "interrupt flag must be cleared on cancellation");

    // No stale waiter is left behind to swallow the next put.
    assert_eq!(q.try_put(1), Err(TryPutError::NoTaker(1)));
    let taker = spawn_take(&q);
    q.put(2).unwrap();
    assert_eq!(taker.join().unwrap().unwrap(), 2);
  }
}

#[test]
fn interrupted_timed_put_returns_item() {
  for mode in BOTH_MODES {
    let q = Arc::new(SynchronousQueue::with_fairness(mode));
    let (tx, rx) = mpsc::channel();
    let putter = {
      let q = q.clone();
      thread::spawn(move || {
        tx.send(interrupt::current()).unwrap();
        q.put_timeout(String::from("kept"), LONG_TIMEOUT)
      })
    };
    rx.recv().unwrap().interrupt();
    assert_eq!(
      putter.join().unwrap(),
      Err(PutTimeoutError::Interrupted(String::from("kept")))
    );
  }
}

#[test]
fn interrupt_racing_a_take_delivers_exactly_once() {
  for mode in BOTH_MODES {
    for round in 0..ITEMS_LOW {
      let q = Arc::new(SynchronousQueue::with_fairness(mode));
      let (tx, rx) = mpsc::channel();
      let putter = {
        let q = q.clone();
        thread::spawn(move || {
          tx.send(interrupt::current()).unwrap();
          q.put(round)
        })
      };
      let handle = rx.recv().unwrap();
      if round % 2 == 0 {
        thread::yield_now();
      }
      handle.interrupt();
      let taken = q.take_timeout(SHORT_TIMEOUT);
      let put = putter.join().unwrap();

      match (put, taken) {
        (Ok(()), Ok(v)) => assert_eq!(v, round),
        (Err(PutError::Interrupted(v)), Err(TakeTimeoutError::Timeout)) => assert_eq!(v, round),
        (put, taken) => panic!("round {}: put {:?}, take {:?}", round, put, taken),
      }
    }
  }
}

#[test]
fn timeout_racing_a_take_delivers_exactly_once() {
  for mode in BOTH_MODES {
    for round in 0..ITEMS_MEDIUM {
      let q = Arc::new(SynchronousQueue::with_fairness(mode));
      let wait = Duration::from_micros((round % 7) as u64 * 50);
      let putter = {
        let q = q.clone();
        thread::spawn(move || q.put_timeout(round, wait))
      };
      let taken = q.take_timeout(wait);
      let put = putter.join().unwrap();

      match (put, taken) {
        (Ok(()), Ok(v)) => assert_eq!(v, round),
        (Err(PutTimeoutError::Timeout(v)), Err(TakeTimeoutError::Timeout)) => assert_eq!(v, round),
        (put, taken) => panic!("round {}: put {:?}, take {:?}", round, put, taken),
      }
    }
  }
}

#[test]
fn no_item_is_dropped_or_duplicated_under_cancellation() {
  for mode in BOTH_MODES {
    let drops = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(AtomicUsize::new(0));
    let returned = Arc::new(AtomicUsize::new(0));
    let q = Arc::new(SynchronousQueue::with_fairness(mode));

    let producers: Vec<_> = (0..4)
      .map(|_| {
        let q = q.clone();
        let drops = drops.clone();
        let returned = returned.clone();
        thread::spawn(move || {
          for _ in 0..ITEMS_LOW {
            match q.put_timeout(DropCounter(drops.clone()), Duration::from_micros(200)) {
              Ok(()) => {}
              Err(e) => {
                drop(e.into_inner());
                returned.fetch_add(1, Ordering::SeqCst);
              }
            }
          }
        })
      })
      .collect();
    let consumers: Vec<_> = (0..4)
      .map(|_| {
        let q = q.clone();
        let delivered = delivered.clone();
        thread::spawn(move || {
          for _ in 0..ITEMS_LOW {
            if let Ok(item) = q.take_timeout(Duration::from_micros(200)) {
              drop(item);
              delivered.fetch_add(1, Ordering::SeqCst);
            }
          }
        })
      })
      .collect();

    for h in producers.into_iter().chain(consumers) {
      h.join().unwrap();
    }
    let total = 4 * ITEMS_LOW;
    assert_eq!(delivered.load(Ordering::SeqCst) + returned.load(Ordering::SeqCst), total);
    assert_eq!(drops.load(Ordering::SeqCst), total, "every item dropped exactly once");
  }
}

#[test]
fn dropping_queue_after_mixed_traffic_drops_each_item_once() {
  for mode in BOTH_MODES {
    let drops = Arc::new(AtomicUsize::new(0));
    let item = || DropCounter(drops.clone());
    let q = Arc::new(SynchronousQueue::with_fairness(mode));

    let first = spawn_put(&q, item());
    thread::sleep(SETTLE);

    // Gives up while it is the newest waiter.
    match q.put_timeout(item(), Duration::from_millis(20)) {
      Err(PutTimeoutError::Timeout(back)) => drop(back),
      other => panic!("expected timeout, got {:?}", other.map_err(|e| e.to_string())),
    }

    // Cancelled with another waiter on each side of it.
    let (tx, rx) = mpsc::channel();
    let middle = {
      let q = q.clone();
      let it = item();
      thread::spawn(move || {
        tx.send(interrupt::current()).unwrap();
        q.put(it)
      })
    };
    let middle_handle = rx.recv().unwrap();
    thread::sleep(SETTLE);
    let last = spawn_put(&q, item());
    thread::sleep(SETTLE);
    middle_handle.interrupt();
    let back = middle.join().unwrap().unwrap_err().into_inner();
    assert!(back.is_some());
    drop(back);
    assert_eq!(drops.load(Ordering::SeqCst), 2);

    drop(q.take().unwrap());
    drop(q.take().unwrap());
    first.join().unwrap().unwrap();
    last.join().unwrap().unwrap();

    // A plain served take.
    let taker = spawn_take(&q);
    thread::sleep(SETTLE);
    q.put(item()).unwrap();
    drop(taker.join().unwrap().unwrap());

    for _ in 0..ITEMS_LOW {
      let taker = spawn_take(&q);
      q.put(item()).unwrap();
      drop(taker.join().unwrap().unwrap());
    }

    drop(q);
    assert_eq!(drops.load(Ordering::SeqCst), 5 + ITEMS_LOW, "every item dropped exactly once");
  }
}

#[test]
fn try_iter_collects_all_waiting_putters() {
  let q = Arc::new(SynchronousQueue::with_fairness(Fairness::Fair));
  let putters: Vec<_> = (0..4).map(|i| spawn_put(&q, i)).collect();
  thread::sleep(SETTLE * 2);

  let mut seen: Vec<i32> = q.try_iter().collect();
  seen.sort_unstable();
  assert_eq!(seen, vec![0, 1, 2, 3]);
  for p in putters {
    p.join().unwrap().unwrap();
  }
}
