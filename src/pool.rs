//! Bounded task set for the two fan-out points (ref pushes, PR updates).
//!
//! Semantics: run every job, at most `concurrency` at a time, wait for all
//! of them, then fail if any failed. Jobs are independent by construction
//! (each targets a distinct ref or PR number), so completion order is
//! irrelevant and results are returned in submission order.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

pub fn run_bounded<T, F>(concurrency: usize, jobs: Vec<F>) -> Result<Vec<T>>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    let workers = concurrency.max(1).min(jobs.len());
    if workers <= 1 {
        return jobs.into_iter().map(|job| job()).collect();
    }

    let slots: Vec<Mutex<Option<F>>> = jobs.into_iter().map(|j| Mutex::new(Some(j))).collect();
    let results: Vec<Mutex<Option<Result<T>>>> =
        (0..slots.len()).map(|_| Mutex::new(None)).collect();
    let next = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= slots.len() {
                    break;
                }
                let job = slots[index]
                    .lock()
                    .expect("pool slot lock poisoned")
                    .take();
                if let Some(job) = job {
                    let outcome = job();
                    *results[index].lock().expect("pool result lock poisoned") = Some(outcome);
                }
            });
        }
    });

    let mut out = Vec::with_capacity(results.len());
    for cell in results {
        match cell.into_inner().expect("pool result lock poisoned") {
            Some(Ok(value)) => out.push(value),
            Some(Err(e)) => return Err(e),
            None => return Err(anyhow!("task never ran")),
        }
    }
    Ok(out)
}
