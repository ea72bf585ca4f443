use std::{
    iter,
    panic::{self, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc},
    thread,
    time::Duration,
};

use crossbeam_deque::Steal;
use log::{debug, error};
use rand::Rng;

use super::{Shared, Task};
use crate::shutdown::panic_message;

/// Empty sweeps over every queue before a worker stops yielding and parks.
const SPIN_ROUNDS: u32 = 32;

/// Upper bound on a park; enqueue unparks the target worker directly, the
/// timeout only matters for stealing from peers.
const IDLE_PARK: Duration = Duration::from_millis(2);

pub(super) struct Worker {
    id: usize,
    local: crossbeam_deque::Worker<Task>,
    shared: Arc<Shared>,
}

impl Worker {
    pub(super) fn new(id: usize, local: crossbeam_deque::Worker<Task>, shared: Arc<Shared>) -> Self {
        Self { id, local, shared }
    }

    pub(super) fn run(self) {
        let mut idle_rounds = 0;

        loop {
            if let Some(task) = self.find_task() {
                idle_rounds = 0;
                self.execute(task);
                continue;
            }

            if self.shared.is_shutting_down() && self.shared.pending.load(Ordering::SeqCst) == 0 {
                break;
            }

            if idle_rounds < SPIN_ROUNDS {
                idle_rounds += 1;
                thread::yield_now();
            } else {
                thread::park_timeout(IDLE_PARK);
            }
        }

        debug!("Worker {} exiting", self.id);
    }

    fn execute(&self, task: Task) {
        self.shared.pending.fetch_sub(1, Ordering::SeqCst);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(
                "Worker {} task panicked: {}",
                self.id,
                panic_message(payload.as_ref())
            );
        }
    }

    /// Own deque first, then own inbox, then peers.
    fn find_task(&self) -> Option<Task> {
        self.local.pop().or_else(|| {
            let inbox = &self.shared.slots[self.id].inbox;

            iter::repeat_with(|| inbox.steal_batch_and_pop(&self.local).or_else(|| self.steal()))
                .find(|s| !s.is_retry())
                .and_then(Steal::success)
        })
    }

    /// One pass over all peers starting at a random victim. Yields `Retry` if
    /// any steal lost a race, so the caller sweeps again.
    fn steal(&self) -> Steal<Task> {
        let slots = &self.shared.slots;
        let peers = slots.len();
        if peers < 2 {
            return Steal::Empty;
        }

        let start = rand::thread_rng().gen_range(0..peers);

        (0..peers)
            .map(|offset| (start + offset) % peers)
            .filter(|&victim| victim != self.id)
            .map(|victim| {
                let slot = &slots[victim];
                slot.stealer
                    .steal()
                    .or_else(|| slot.inbox.steal_batch_and_pop(&self.local))
            })
            .collect()
    }
}
