use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::source::Source;
use crate::worker::{Job, Shared, Worker};

/// Runtime pool resizing, as seen by a [`Controller`](crate::Controller).
pub(crate) trait Resize: Send + Sync {
    fn increase(&self) -> bool;
    fn reduce(&self) -> bool;
}

/// Workers sharing one distribution queue.
///
/// The pool keeps its own ends of the queue until planning completes: the
/// receiver to hand to new workers, the sender to post stop messages. Once
/// both are dropped, workers see a closed queue after the last range.
///
/// Workers and stop messages are spawned on the runtime that created the
/// pool, so resizing works from any thread.
pub(crate) struct Pool<S> {
    shared:  Shared<S>,
    runtime: Handle,
    max:     usize,
    next_id: AtomicU64,
    state:   Mutex<PoolState>,
}

struct PoolState {
    tx:    Option<flume::Sender<Job>>,
    rx:    Option<flume::Receiver<Job>>,
    tasks: JoinSet<()>,
}

impl<S: Source> Pool<S> {
    /// Must be called from within a tokio runtime.
    pub fn new(
        shared: Shared<S>,
        max: usize,
        tx: flume::Sender<Job>,
        rx: flume::Receiver<Job>,
    ) -> Self {
        Self {
            shared,
            runtime: Handle::current(),
            max,
            next_id: AtomicU64::new(1),
            state: Mutex::new(PoolState {
                tx:    Some(tx),
                rx:    Some(rx),
                tasks: JoinSet::new(),
            }),
        }
    }

    /// Spawn the initial `n` workers.
    pub fn start(&self, n: usize) {
        let mut state = self.state.lock();
        for _ in 0..n {
            self.spawn(&mut state);
        }
    }

    /// Drop the pool's queue ends; no worker can be added afterwards.
    pub fn planning_done(&self) {
        let mut state = self.state.lock();
        state.tx = None;
        state.rx = None;
    }

    pub fn take_tasks(&self) -> JoinSet<()> { std::mem::take(&mut self.state.lock().tasks) }

    fn spawn(&self, state: &mut PoolState) -> bool {
        let Some(rx) = state.rx.clone() else {
            return false;
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.board.worker_joined();
        state
            .tasks
            .spawn_on(Worker::new(id, self.shared.clone()).serve(rx), &self.runtime);
        debug!(worker = id, "worker spawned");
        true
    }
}

impl<S: Source> Resize for Pool<S> {
    fn increase(&self) -> bool {
        let mut state = self.state.lock();
        if state.rx.is_none() || !self.shared.board.try_grow(self.max) {
            debug!("increase rejected");
            return false;
        }
        info!("worker pool increased");
        self.spawn(&mut state)
    }

    fn reduce(&self) -> bool {
        let state = self.state.lock();
        let Some(tx) = state.tx.clone() else {
            debug!("reduce rejected");
            return false;
        };
        if !self.shared.board.try_shrink() {
            debug!("reduce rejected");
            return false;
        }
        info!("worker pool reduced");

        let cancel = self.shared.cancel.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tx.send_async(Job::Stop) => {}
            }
        });
        true
    }
}
