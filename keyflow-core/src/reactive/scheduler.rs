//! Serial Queue
//!
//! The serial queue is the execution context every stateful component runs
//! its mutations in. It guarantees that one job is fully processed before the
//! next one starts, without holding a lock while the job runs.
//!
//! # Algorithm
//!
//! This is the classic queue-drain loop:
//!
//! 1. A submitted job is appended to the queue.
//! 2. If nobody is draining, the submitting thread becomes the drainer and
//!    runs jobs in FIFO order until the queue is empty.
//! 3. If somebody is already draining (the same thread re-entering from inside
//!    a job, or another thread), the submitter returns immediately and the
//!    drainer picks the job up after the current one.
//!
//! An uncontended submission therefore runs synchronously on the caller,
//! which keeps single-threaded behavior identical to plain function calls.
//! Re-entrant submissions are deferred instead of nesting, so a listener that
//! reacts to snapshot N by producing snapshot N+1 cannot make other listeners
//! see N+1 before N.

use std::collections::VecDeque;

use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send>;

/// A serialized execution context.
pub struct SerialQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    jobs: VecDeque<Job>,
    draining: bool,
}

impl SerialQueue {
    /// Create a new idle queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Run `job` in this context.
    ///
    /// Runs it (and anything it enqueues) before returning if the queue is
    /// idle; otherwise hands it to the current drainer.
    pub fn run<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            state.jobs.push_back(Box::new(job));
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let _guard = DrainGuard { queue: self };
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            next();
        }
    }

    /// Whether a thread is currently draining this queue.
    pub fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.state.lock().jobs.len()
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SerialQueue")
            .field("pending", &state.jobs.len())
            .field("draining", &state.draining)
            .finish()
    }
}

/// Releases the drainer role if a job unwinds, so the queue stays usable.
struct DrainGuard<'a> {
    queue: &'a SerialQueue,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.queue.state.lock().draining = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn idle_queue_runs_synchronously() {
        let queue = SerialQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        queue.run(move || log_clone.lock().push(1));

        assert_eq!(*log.lock(), vec![1]);
        assert!(!queue.is_draining());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn reentrant_jobs_run_after_the_current_one() {
        let queue = Arc::new(SerialQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let (q, l) = (queue.clone(), log.clone());
        queue.run(move || {
            l.lock().push("outer start");
            let inner_log = l.clone();
            q.run(move || inner_log.lock().push("inner"));
            l.lock().push("outer end");
        });

        assert_eq!(*log.lock(), vec!["outer start", "outer end", "inner"]);
    }

    #[test]
    fn jobs_from_other_threads_are_serialized() {
        let queue = Arc::new(SerialQueue::new());
        let counter = Arc::new(Mutex::new(0u32));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let counter = counter.clone();
                        queue.run(move || *counter.lock() += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every submitter either drained or handed its job to a drainer that
        // was still running, so nothing is left behind.
        assert_eq!(queue.pending(), 0);
        assert_eq!(*counter.lock(), 1000);
    }

    #[test]
    fn panicking_job_releases_the_queue() {
        let queue = Arc::new(SerialQueue::new());
        let q = queue.clone();
        let result = std::thread::spawn(move || q.run(|| panic!("job failed"))).join();
        assert!(result.is_err());

        assert!(!queue.is_draining());
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = ran.clone();
        queue.run(move || *ran_clone.lock() = true);
        assert!(*ran.lock());
    }
}
