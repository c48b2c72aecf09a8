// examples/pipeline.rs
use fibre_handoff::{interrupt, Fairness, SynchronousQueue, TakeError, TakeTimeoutError};
use std::{sync::mpsc, sync::Arc, thread, time::Duration};

fn main() {
  println!("--- Fair hand-off: 3 producers, 2 workers ---");
  {
    let q = Arc::new(SynchronousQueue::<String>::with_fairness(Fairness::Fair));
    let num_producers = 3;
    let jobs_per_producer = 4;

    let producers: Vec<_> = (0..num_producers)
      .map(|p| {
        let q = Arc::clone(&q);
        thread::spawn(move || {
          for j in 0..jobs_per_producer {
            let job = format!("job-P{}-{}", p, j);
            q.put(job.clone()).unwrap();
            println!("[Producer {}] handed off {}", p, job);
          }
        })
      })
      .collect();

    let workers: Vec<_> = (0..2)
      .map(|w| {
        let q = Arc::clone(&q);
        thread::spawn(move || {
          let mut done = 0;
          // Workers stop once no job shows up for a while.
          loop {
            match q.take_timeout(Duration::from_millis(200)) {
              Ok(job) => {
                println!("[Worker {}] processing {}", w, job);
                thread::sleep(Duration::from_millis(5));
                done += 1;
              }
              Err(TakeTimeoutError::Timeout) => break,
              Err(TakeTimeoutError::Interrupted) => break,
            }
          }
          done
        })
      })
      .collect();

    for p in producers {
      p.join().unwrap();
    }
    let total: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    println!("Processed {} jobs", total);
    assert_eq!(total, num_producers * jobs_per_producer);
  }

  println!("\n--- Offer without a taker ---");
  {
    let q = SynchronousQueue::new();
    match q.try_put(1) {
      Ok(()) => println!("delivered"),
      Err(e) => println!("not delivered ({}), got back {}", e, e.clone().into_inner()),
    }
  }

  println!("\n--- Interrupting a blocked take ---");
  {
    let q = Arc::new(SynchronousQueue::<u32>::new());
    let (tx, rx) = mpsc::channel();
    let q_clone = Arc::clone(&q);
    let waiter = thread::spawn(move || {
      tx.send(interrupt::current()).unwrap();
      q_clone.take()
    });

    let handle = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    handle.interrupt();
    match waiter.join().unwrap() {
      Ok(v) => println!("unexpectedly received {}", v),
      Err(TakeError::Interrupted) => println!("take was interrupted, queue still usable: {:?}", q),
    }
  }
}
