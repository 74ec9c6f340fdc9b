//! Bounded thread pool for specialist and QA calls.
//!
//! Jobs go through a bounded `crossbeam-channel` queue to named worker
//! threads. Each job replies on its own `bounded(1)` channel, which the
//! coordinator reads with a deadline. A job that panics drops its reply
//! sender, so the waiting side sees [`JobError::Lost`] instead of hanging.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::PlanError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a job produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobError {
    /// The deadline passed first. The job may still be running.
    TimedOut,
    /// The job panicked or its worker went away.
    Lost,
}

pub(crate) struct WorkerPool {
    name: String,
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub(crate) fn start(name: &str, workers: usize, queue_capacity: usize) -> Result<Self, PlanError> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("buildplan-{name}-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        // A panicking job must not take the worker down with it.
                        let _ = panic::catch_unwind(AssertUnwindSafe(job));
                    }
                })
                .map_err(|e| PlanError::internal(format!("failed to spawn {name} worker: {e}")))?;
            handles.push(handle);
        }
        debug!(pool = name, workers, queue_capacity, "worker pool started");

        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            workers: handles,
            queue_capacity,
        })
    }

    /// Queues `f` without blocking.
    pub(crate) fn try_submit<T, F>(&self, f: F) -> Result<JobHandle<T>, PlanError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let Some(tx) = &self.tx else {
            return Err(PlanError::internal(format!("{} pool is shut down", self.name)));
        };
        let (reply_tx, reply_rx) = bounded::<T>(1);
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        match tx.try_send(job) {
            Ok(()) => Ok(JobHandle { rx: reply_rx }),
            Err(TrySendError::Full(_)) => Err(PlanError::internal(format!(
                "{} queue is full (capacity {})",
                self.name, self.queue_capacity
            ))),
            Err(TrySendError::Disconnected(_)) => {
                Err(PlanError::internal(format!("{} workers disconnected", self.name)))
            }
        }
    }

    /// Closes the queue, joins workers that finish within `grace` and
    /// detaches the rest.
    pub(crate) fn shutdown(mut self, grace: Duration) {
        // Workers drain queued jobs, then exit.
        drop(self.tx.take());
        let deadline = Instant::now() + grace;
        let mut detached = 0usize;
        for handle in std::mem::take(&mut self.workers) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                detached += 1;
            }
        }
        if detached > 0 {
            warn!(pool = %self.name, detached, "detached workers still running at shutdown");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Never block in drop; unjoined workers exit once the queue is closed.
        drop(self.tx.take());
    }
}

/// Reply side of a submitted job.
pub(crate) struct JobHandle<T> {
    rx: Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Waits for the job until `deadline`.
    pub(crate) fn recv_deadline(&self, deadline: Instant) -> Result<T, JobError> {
        self.rx.recv_deadline(deadline).map_err(|err| match err {
            RecvTimeoutError::Timeout => JobError::TimedOut,
            RecvTimeoutError::Disconnected => JobError::Lost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn jobs_run_concurrently() {
        let pool = WorkerPool::start("test", 2, 4).unwrap();
        let started = Instant::now();
        let a = pool.try_submit(|| thread::sleep(Duration::from_millis(150))).unwrap();
        let b = pool.try_submit(|| thread::sleep(Duration::from_millis(150))).unwrap();
        a.recv_deadline(soon(1_000)).unwrap();
        b.recv_deadline(soon(1_000)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(290));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn deadline_reports_timeout() {
        let pool = WorkerPool::start("test", 1, 1).unwrap();
        let slow = pool
            .try_submit(|| {
                thread::sleep(Duration::from_millis(300));
                1
            })
            .unwrap();
        assert_eq!(slow.recv_deadline(soon(20)), Err(JobError::TimedOut));
        pool.shutdown(Duration::ZERO);
    }

    #[test]
    fn panicking_job_is_lost_and_worker_survives() {
        let pool = WorkerPool::start("test", 1, 2).unwrap();
        let boom = pool.try_submit(|| -> u32 { panic!("backend bug") }).unwrap();
        assert_eq!(boom.recv_deadline(soon(1_000)), Err(JobError::Lost));
        let ok = pool.try_submit(|| 7).unwrap();
        assert_eq!(ok.recv_deadline(soon(1_000)), Ok(7));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn full_queue_is_rejected() {
        let pool = WorkerPool::start("test", 1, 1).unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let busy = pool.try_submit(move || gate_rx.recv().is_ok()).unwrap();
        // Wait until the worker has taken the first job off the queue.
        thread::sleep(Duration::from_millis(20));
        let _queued = pool.try_submit(|| ()).unwrap();
        let err = pool.try_submit(|| ()).err().unwrap();
        assert!(err.to_string().contains("queue is full"));
        gate_tx.send(()).unwrap();
        assert_eq!(busy.recv_deadline(soon(1_000)), Ok(true));
        pool.shutdown(Duration::from_secs(1));
    }
}
