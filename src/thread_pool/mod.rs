//! Fixed-size work-stealing pool.
//!
//! Every worker owns a LIFO deque it pops from without contention, plus an
//! inbox that other threads push into. Idle workers drain their inbox, then
//! steal from the cold end of a randomly chosen peer.

use std::{
    io, mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, OnceLock, PoisonError,
    },
    thread::{self, JoinHandle, Thread, ThreadId},
};

use crossbeam_deque::{Injector, Stealer};
use log::{debug, info};
use thiserror::Error;

use self::worker::Worker;

mod worker;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("thread pool has not been started")]
    NotStarted,
    #[error("thread pool is stopped")]
    Stopped,
    #[error("thread pool already holds {0} pending tasks")]
    Saturated(usize),
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("thread pool needs at least one worker")]
    NoWorkers,
    #[error("thread pool was already started")]
    AlreadyStarted,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// State shared between the pool handle and its workers.
#[derive(Debug)]
struct Shared {
    slots: Vec<Slot>,
    shutdown: AtomicBool,
    /// Tasks accepted by `enqueue` and not yet picked up by a worker.
    pending: AtomicUsize,
    next_slot: AtomicUsize,
}

#[derive(Debug)]
struct Slot {
    inbox: Injector<Task>,
    stealer: Stealer<Task>,
    thread: OnceLock<Thread>,
}

impl Shared {
    fn worker_index(&self, id: ThreadId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.thread.get().map(Thread::id) == Some(id))
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn wake_all(&self) {
        for slot in &self.slots {
            if let Some(thread) = slot.thread.get() {
                thread.unpark();
            }
        }
    }
}

/// Worker threads from the point of view of `start` and `stop`.
#[derive(Debug, Default)]
enum Workers {
    #[default]
    Idle,
    Running(Vec<JoinHandle<()>>),
    /// Some `stop` call took the handles and is joining them.
    Joining,
    Joined,
}

#[derive(Debug)]
pub struct ThreadPool {
    max_pending: usize,
    shared: OnceLock<Arc<Shared>>,
    workers: Mutex<Workers>,
    joined: Condvar,
}

impl ThreadPool {
    /// Creates a pool in the uninitialized state. `max_pending` bounds the
    /// number of queued tasks; 0 means unbounded.
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            shared: OnceLock::new(),
            workers: Mutex::new(Workers::Idle),
            joined: Condvar::new(),
        }
    }

    /// Spawns `size` workers. May be called once.
    pub fn start(&self, size: usize) -> Result<(), StartError> {
        if size == 0 {
            return Err(StartError::NoWorkers);
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.get().is_some() {
            return Err(StartError::AlreadyStarted);
        }

        let locals: Vec<_> = (0..size)
            .map(|_| crossbeam_deque::Worker::new_lifo())
            .collect();
        let shared = Arc::new(Shared {
            slots: locals
                .iter()
                .map(|local| Slot {
                    inbox: Injector::new(),
                    stealer: local.stealer(),
                    thread: OnceLock::new(),
                })
                .collect(),
            shutdown: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            next_slot: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(size);
        for (id, local) in locals.into_iter().enumerate() {
            let worker = Worker::new(id, local, Arc::clone(&shared));
            let spawned = thread::Builder::new()
                .name(format!("staticd-worker-{id}"))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => {
                    let _ = shared.slots[id].thread.set(handle.thread().clone());
                    handles.push(handle);
                }
                Err(e) => {
                    shared.shutdown.store(true, Ordering::SeqCst);
                    shared.wake_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        let _ = self.shared.set(shared);
        *workers = Workers::Running(handles);
        info!("Thread pool started with {size} workers");
        Ok(())
    }

    /// Queues a task without blocking. From a worker thread the task goes to
    /// that worker's own inbox; from any other thread inboxes are picked
    /// round-robin.
    pub fn enqueue<F>(&self, f: F) -> Result<(), EnqueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = self.shared.get().ok_or(EnqueueError::NotStarted)?;

        // Counted before the shutdown check so a worker never sees an empty
        // pool while this task is on its way into a queue.
        let queued = shared.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if shared.is_shutting_down() {
            shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(EnqueueError::Stopped);
        }
        if self.max_pending > 0 && queued > self.max_pending {
            shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(EnqueueError::Saturated(queued - 1));
        }

        // The owner deque lives on the worker's stack and is not reachable from
        // here, so even a worker's own submissions go through its inbox. The
        // inbox is multi-producer; `find_task` drains it into the owner deque in
        // batches before looking at peers, which keeps the task local.
        let index = shared
            .worker_index(thread::current().id())
            .unwrap_or_else(|| {
                shared.next_slot.fetch_add(1, Ordering::Relaxed) % shared.slots.len()
            });

        let slot = &shared.slots[index];
        slot.inbox.push(Box::new(f));
        if let Some(thread) = slot.thread.get() {
            thread.unpark();
        }

        Ok(())
    }

    /// Asks every worker to finish the queued work and waits until all of them
    /// have exited. Safe to call repeatedly and from several threads at once:
    /// every caller outside the pool returns only after the workers are joined.
    /// Called from a task, it only raises the shutdown flag.
    pub fn stop(&self) {
        let Some(shared) = self.shared.get() else {
            return;
        };

        shared.shutdown.store(true, Ordering::SeqCst);
        shared.wake_all();

        if shared.worker_index(thread::current().id()).is_some() {
            // A worker cannot join itself. It exits once the queues drain and
            // the outside caller of `stop` joins it.
            return;
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let handles = match mem::take(&mut *workers) {
            Workers::Running(handles) => handles,
            Workers::Joining => {
                *workers = Workers::Joining;
                let _joined = self
                    .joined
                    .wait_while(workers, |w| matches!(w, Workers::Joining))
                    .unwrap_or_else(PoisonError::into_inner);
                return;
            }
            done => {
                *workers = done;
                return;
            }
        };
        *workers = Workers::Joining;
        drop(workers);

        for handle in handles {
            if handle.join().is_err() {
                debug!("Worker thread exited by panic");
            }
        }

        *self.workers.lock().unwrap_or_else(PoisonError::into_inner) = Workers::Joined;
        self.joined.notify_all();
        info!("Thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}
