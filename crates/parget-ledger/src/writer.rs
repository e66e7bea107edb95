use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::metadata::DbKeys;

/// New cumulative total for one range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Update {
    pub id:    u64,
    pub total: u64,
}

/// Shared slot holding the first failure of the writer task.
pub(crate) type Failure = Arc<Mutex<Option<String>>>;

/// Drain the update queue into `tasks`, one sled batch per wakeup.
///
/// Everything already queued when the first update arrives is folded into a
/// map in submission order, so the last total per id wins. The task ends once
/// every sender is gone and the queue is empty, or on the first failed batch.
pub(crate) async fn run(mut rx: mpsc::Receiver<Update>, tasks: sled::Tree, failure: Failure) {
    let mut pending: HashMap<u64, u64> = HashMap::new();

    while let Some(first) = rx.recv().await {
        pending.insert(first.id, first.total);
        while let Ok(next) = rx.try_recv() {
            pending.insert(next.id, next.total);
        }

        let count = pending.len();
        let mut batch = sled::Batch::default();
        for (id, total) in pending.drain() {
            batch.insert(&DbKeys::task(id)[..], &total.to_be_bytes()[..]);
        }

        if let Err(e) = tasks.apply_batch(batch) {
            tracing::error!(error = %e, "failed to persist progress batch");
            failure.lock().get_or_insert_with(|| e.to_string());
            return;
        }
        tracing::trace!(count, "persisted progress batch");
    }
}
