/*!
    Pipeline execution context.

    The context replaces ambient singletons: it owns the shared
    image-processing queue and the framebuffer pool, is created once per
    session, and is threaded through the constructors of everything that
    produces or renders framebuffers.
*/

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::framebuffer_pool::FramebufferPool;

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/**
    A single-threaded cooperative work queue.

    One worker thread owns everything submitted to the queue. Submissions
    from the worker itself run inline, so queue-owned code can call back
    into the queue without deadlocking.
*/
pub struct SerialQueue {
    label: &'static str,
    tx: Sender<Job>,
    worker_id: Arc<OnceLock<ThreadId>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
    pub fn new(label: &'static str) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let worker_id = Arc::new(OnceLock::new());

        let handle = {
            let worker_id = Arc::clone(&worker_id);
            thread::spawn(move || {
                let _ = worker_id.set(thread::current().id());
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run(work) => work(),
                        Job::Shutdown => break,
                    }
                }
            })
        };

        Self {
            label,
            tx,
            worker_id,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /**
        True if the calling thread is this queue's worker.
    */
    pub fn is_current(&self) -> bool {
        self.worker_id.get().copied() == Some(thread::current().id())
    }

    /**
        Submit work to run on the queue, without waiting for it.
    */
    pub fn run_async(&self, work: impl FnOnce() + Send + 'static) {
        if self.tx.send(Job::Run(Box::new(work))).is_err() {
            warn!(queue = self.label, "dropping work submitted after shutdown");
        }
    }

    /**
        Run work on the queue and wait for its result.

        Reentrant: if the caller is already the queue's worker thread, the
        work runs inline instead of deadlocking on a self-dispatch.
    */
    pub fn run_sync<R, F>(&self, work: F) -> R
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return work();
        }
        let (tx, rx) = bounded(1);
        self.run_async(move || {
            let _ = tx.send(work());
        });
        rx.recv().expect("serial queue worker exited")
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/**
    A condition-variable-guarded boolean used to propagate downstream
    back-pressure to a reader thread.

    Writer-readiness observers flip the flag under the lock and signal;
    the reader parks in [`wait_until_open`](Self::wait_until_open) while
    the gate is closed. The number of times a waiter actually parked is
    observable, which the synchronized-transcode tests rely on.
*/
pub struct ReadingGate {
    should_wait: Mutex<bool>,
    condition: Condvar,
    waits: AtomicU64,
}

impl ReadingGate {
    pub fn new() -> Self {
        Self {
            should_wait: Mutex::new(false),
            condition: Condvar::new(),
            waits: AtomicU64::new(0),
        }
    }

    /**
        Close (`true`) or open (`false`) the gate. Opening wakes all
        waiters.
    */
    pub fn set_should_wait(&self, wait: bool) {
        let mut guard = self.should_wait.lock();
        *guard = wait;
        if !wait {
            self.condition.notify_all();
        }
    }

    /**
        Block the calling thread until the gate is open.
    */
    pub fn wait_until_open(&self) {
        let mut guard = self.should_wait.lock();
        if *guard {
            self.waits.fetch_add(1, Ordering::Relaxed);
            while *guard {
                self.condition.wait(&mut guard);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.should_wait.lock()
    }

    /**
        How many times a waiter has parked on the gate.
    */
    pub fn wait_count(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}

impl Default for ReadingGate {
    fn default() -> Self {
        Self::new()
    }
}

/**
    Session-scoped pipeline context.
*/
pub struct PipelineContext {
    image_queue: SerialQueue,
    framebuffer_pool: Arc<FramebufferPool>,
}

impl PipelineContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            image_queue: SerialQueue::new("reel.image-processing"),
            framebuffer_pool: FramebufferPool::new(),
        })
    }

    /**
        The shared image-processing queue. All framebuffer production and
        rendering is serialized through it.
    */
    pub fn image_queue(&self) -> &SerialQueue {
        &self.image_queue
    }

    pub fn framebuffer_pool(&self) -> &Arc<FramebufferPool> {
        &self.framebuffer_pool
    }
}
