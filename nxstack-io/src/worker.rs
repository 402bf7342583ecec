//! Keyed background worker.
//!
//! One thread runs jobs in submission order. Each job has a key naming its
//! target; submitting a second job for a key replaces the first if it has
//! not started yet, and raises the cancel flag of the first if it is running.

use crate::{Error, Result};
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cooperative cancellation flag shared between a job and its submitter.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// # Errors
    /// Returns `Cancelled` once the token has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// How a submitted job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Failed(Error),
    Cancelled,
    /// Superseded by a later submission before it started.
    Replaced,
}

impl JobOutcome {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => JobOutcome::Completed,
            Err(Error::Cancelled) => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failed(e),
        }
    }
}

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    token: CancelToken,
    outcome: Receiver<JobOutcome>,
}

impl JobHandle {
    /// Requests cancellation. A job that has not started reports `Cancelled`
    /// without running.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Blocks until the job ends.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the worker went away without reporting.
    pub fn wait(self) -> Result<JobOutcome> {
        self.outcome
            .recv()
            .map_err(|_| Error::InvalidArgument("worker stopped before the job ended".to_string()))
    }

    /// Waits at most `timeout`; `None` if the job is still going.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcome.recv_timeout(timeout).ok()
    }
}

type Task = Box<dyn FnOnce(&CancelToken) -> Result<()> + Send>;

struct Pending<K> {
    key: K,
    token: CancelToken,
    task: Task,
    reply: Sender<JobOutcome>,
}

struct Queue<K> {
    pending: VecDeque<Pending<K>>,
    running: Option<(K, CancelToken)>,
    shutdown: bool,
}

struct Shared<K> {
    queue: Mutex<Queue<K>>,
    ready: Condvar,
}

impl<K> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, Queue<K>> {
        // Jobs never run while the lock is held.
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Single-thread worker with replace-on-resubmit scheduling per key.
pub struct Worker<K> {
    shared: Arc<Shared<K>>,
    thread: Option<JoinHandle<()>>,
}

impl<K> Worker<K>
where
    K: Eq + Clone + Debug + Send + 'static,
{
    /// Starts the worker thread.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn new(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                running: None,
                shutdown: false,
            }),
            ready: Condvar::new(),
        });
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(&shared)
            })?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Queues `task` for `key`.
    ///
    /// A pending job with the same key is dropped and reports `Replaced`; a
    /// running job with the same key is asked to cancel.
    pub fn submit<F>(&self, key: K, task: F) -> JobHandle
    where
        F: FnOnce(&CancelToken) -> Result<()> + Send + 'static,
    {
        let token = CancelToken::new();
        let (reply, outcome) = mpsc::channel();
        let mut queue = self.shared.lock();

        if let Some(pos) = queue.pending.iter().position(|p| p.key == key) {
            if let Some(old) = queue.pending.remove(pos) {
                debug!("replacing pending job {key:?}");
                let _ = old.reply.send(JobOutcome::Replaced);
            }
        }
        if let Some((running, running_token)) = &queue.running {
            if *running == key {
                debug!("cancelling running job {key:?}");
                running_token.cancel();
            }
        }

        queue.pending.push_back(Pending {
            key,
            token: token.clone(),
            task: Box::new(task),
            reply,
        });
        drop(queue);
        self.shared.ready.notify_one();
        JobHandle { token, outcome }
    }

    /// Number of jobs waiting to start.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl<K> Worker<K> {
    /// Cancels everything, waits for the thread and reports remaining jobs
    /// as cancelled. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.lock();
            queue.shutdown = true;
            if let Some((_, token)) = &queue.running {
                token.cancel();
            }
            for job in queue.pending.drain(..) {
                let _ = job.reply.send(JobOutcome::Cancelled);
            }
        }
        self.shared.ready.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl<K> Drop for Worker<K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<K: Clone + Debug>(shared: &Shared<K>) {
    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(job) = queue.pending.pop_front() {
                    queue.running = Some((job.key.clone(), job.token.clone()));
                    break job;
                }
                queue = shared
                    .ready
                    .wait(queue)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        };

        debug!("starting job {:?}", job.key);
        let outcome = if job.token.is_cancelled() {
            JobOutcome::Cancelled
        } else {
            let token = &job.token;
            let task = job.task;
            match panic::catch_unwind(AssertUnwindSafe(|| task(token))) {
                Ok(result) => JobOutcome::from_result(result),
                Err(_) => {
                    warn!("job {:?} panicked", job.key);
                    JobOutcome::Failed(Error::InvalidArgument(format!("job {:?} panicked", job.key)))
                }
            }
        };
        shared.lock().running = None;
        let _ = job.reply.send(outcome);
    }
}
