//! Rebuild worker pool
//!
//! Fixed-size pool that runs asynchronous cache rebuilds and nothing else.
//! Submission never blocks: when the queue is full the task is dropped,
//! which drops whatever lock guard it captured and so releases the lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;

use crate::error::Result;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Bounded background pool owned by one cache engine
pub struct RebuildPool {
    /// `None` once shut down
    sender: Mutex<Option<Sender<Task>>>,

    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Queued + running tasks
    in_flight: Arc<AtomicUsize>,

    size: usize,
}

impl RebuildPool {
    /// Spawn `workers` threads sharing a queue of `queue_capacity` tasks
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self> {
        let (sender, receiver) = channel::bounded::<Task>(queue_capacity);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let receiver = receiver.clone();
            let in_flight = Arc::clone(&in_flight);

            let handle = thread::Builder::new()
                .name(format!("cache-rebuild-{}", i))
                .spawn(move || {
                    for task in receiver.iter() {
                        if catch_unwind(AssertUnwindSafe(task)).is_err() {
                            tracing::error!("Cache rebuild task panicked");
                        }
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            in_flight,
            size: workers,
        })
    }

    /// Queue a task. Returns false (and drops the task) when the queue is
    /// full or the pool is shut down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::warn!("Rebuild pool is shut down; dropping task");
            return false;
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(Box::new(task)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!("Rebuild queue full; dropping task");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// Tasks queued or running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting tasks, run everything already queued, join workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        // Dropping the only sender ends each worker's receive loop once drained
        drop(self.sender.lock().take());

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Rebuild worker exited abnormally");
            }
        }
    }
}

impl Drop for RebuildPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
