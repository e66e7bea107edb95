use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parget_fs::PayloadPaths;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::metadata::{DbKeys, Metadata};
use crate::writer::{self, Failure, Update};

/// Outcome of [`Ledger::validate_or_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Fresh ledger: metadata written, payload preallocated.
    Created,
    /// Stored metadata matched the probe; recorded progress is valid.
    Resumed,
}

/// Persistent progress store for one download.
///
/// Holds the resource metadata and a cumulative byte count per range id.
/// Progress updates go through a bounded queue to a single writer task which
/// coalesces them into sled batches, so a crash loses at most the updates that
/// were still queued and never tears a single record.
///
/// Must be opened inside a tokio runtime.
pub struct Ledger {
    paths:     PayloadPaths,
    state:     RwLock<Option<Open>>,
    submitted: Mutex<HashMap<u64, u64>>,
    failure:   Failure,
}

struct Open {
    db:     sled::Db,
    meta:   sled::Tree,
    tasks:  sled::Tree,
    tx:     mpsc::Sender<Update>,
    writer: JoinHandle<()>,
}

impl Ledger {
    pub fn open(paths: PayloadPaths) -> Result<Self> {
        let db = sled::open(paths.store())?;
        let meta = db.open_tree(DbKeys::METADATA_TREE)?;
        let tasks = db.open_tree(DbKeys::TASK_TREE)?;

        let failure = Failure::default();
        let (tx, rx) = mpsc::channel(queue_capacity());
        let writer = tokio::spawn(writer::run(rx, tasks.clone(), Arc::clone(&failure)));
        debug!(store = ?paths.store(), "opened ledger");

        Ok(Self {
            paths,
            state: RwLock::new(Some(Open {
                db,
                meta,
                tasks,
                tx,
                writer,
            })),
            submitted: Mutex::new(HashMap::new()),
            failure,
        })
    }

    pub fn paths(&self) -> &PayloadPaths { &self.paths }

    pub fn is_open(&self) -> bool { self.state.read().is_some() }

    /// Compare stored metadata with a fresh probe, or initialise the ledger.
    ///
    /// On a fresh ledger the payload is preallocated before the metadata is
    /// written, so a crash in between leaves a store that re-initialises on
    /// the next run. On resume the payload must still exist at full length.
    pub fn validate_or_init(&self, size: u64, block: u64, modified: &str) -> Result<Validation> {
        let (db, meta, tasks) = self.trees()?;
        let probed = Metadata::new(size, block, modified);

        if let Some(raw) = meta.get(DbKeys::METADATA)? {
            let stored = Metadata::decode(&raw)?;
            if stored != probed {
                return Err(LedgerError::Mismatch { stored, probed });
            }
            let actual = parget_fs::payload_len(self.paths.payload())?;
            if actual != Some(size) {
                return Err(LedgerError::PayloadLength {
                    path: self.paths.payload().to_path_buf(),
                    expected: size,
                    actual,
                });
            }
            info!(%stored, "resuming from existing ledger");
            return Ok(Validation::Resumed);
        }

        tasks.clear()?;
        self.submitted.lock().clear();
        parget_fs::preallocate(self.paths.payload(), size)?;
        meta.insert(DbKeys::METADATA, probed.encode()?)?;
        db.flush()?;
        info!(%probed, "initialised ledger");
        Ok(Validation::Created)
    }

    /// Stored metadata, if the ledger was initialised.
    pub fn metadata(&self) -> Result<Option<Metadata>> {
        let (_, meta, _) = self.trees()?;
        meta.get(DbKeys::METADATA)?
            .map(|raw| Metadata::decode(&raw))
            .transpose()
    }

    /// Bytes recorded for range `id`; 0 when nothing was recorded.
    ///
    /// Reflects every update this handle already accepted, even those the
    /// writer has not persisted yet.
    pub fn get_progress(&self, id: u64) -> Result<u64> {
        if let Some(&total) = self.submitted.lock().get(&id) {
            return Ok(total);
        }
        self.stored_progress(id)
    }

    /// Record the new cumulative total for range `id`.
    ///
    /// Returns once the update is queued. A total smaller than the last one
    /// seen for the same id is rejected.
    pub async fn set_progress(&self, id: u64, total: u64) -> Result<()> {
        self.check_writer()?;
        let tx = self.sender()?;

        let known = self.submitted.lock().contains_key(&id);
        let stored = if known { None } else { Some(self.stored_progress(id)?) };
        {
            let mut submitted = self.submitted.lock();
            let previous = submitted.get(&id).copied().or(stored).unwrap_or(0);
            if total < previous {
                return Err(LedgerError::Regressed {
                    id,
                    previous,
                    next: total,
                });
            }
            submitted.insert(id, total);
        }

        tx.send(Update { id, total })
            .await
            .map_err(|_| self.writer_error())
    }

    /// Every recorded range as `(id, bytes)`, ordered by id.
    pub fn entries(&self) -> Result<Vec<(u64, u64)>> {
        let (_, _, tasks) = self.trees()?;
        let mut all = BTreeMap::new();
        for item in tasks.iter() {
            let (key, value) = item?;
            let id = DbKeys::task_id(&key).ok_or(LedgerError::CorruptRecord { id: 0 })?;
            let total = DbKeys::progress(&value).ok_or(LedgerError::CorruptRecord { id })?;
            all.insert(id, total);
        }
        all.extend(self.submitted.lock().iter().map(|(&id, &total)| (id, total)));
        Ok(all.into_iter().collect())
    }

    /// Flush pending progress and release the store, keeping it on disk.
    pub async fn close(&self) -> Result<()> {
        let open = self.take()?;
        shutdown(open, &self.failure).await?;
        debug!(store = ?self.paths.store(), "closed ledger");
        Ok(())
    }

    /// Flush, move the payload onto the output path and delete the store.
    ///
    /// A store that cannot be removed only produces a warning; the download
    /// itself is complete at that point.
    pub async fn finalize(&self) -> Result<()> {
        let open = self.take()?;
        let db = shutdown(open, &self.failure).await?;

        parget_fs::commit(self.paths.payload(), self.paths.output())?;
        drop(db);

        if let Err(e) = parget_fs::remove_store(self.paths.store()) {
            warn!(error = %e, "failed to remove progress store");
        }
        info!(output = ?self.paths.output(), "download committed");
        Ok(())
    }

    fn trees(&self) -> Result<(sled::Db, sled::Tree, sled::Tree)> {
        let state = self.state.read();
        let open = state.as_ref().ok_or(LedgerError::Closed)?;
        Ok((open.db.clone(), open.meta.clone(), open.tasks.clone()))
    }

    fn sender(&self) -> Result<mpsc::Sender<Update>> {
        let state = self.state.read();
        let open = state.as_ref().ok_or(LedgerError::Closed)?;
        Ok(open.tx.clone())
    }

    fn take(&self) -> Result<Open> { self.state.write().take().ok_or(LedgerError::Closed) }

    fn stored_progress(&self, id: u64) -> Result<u64> {
        let (_, _, tasks) = self.trees()?;
        match tasks.get(DbKeys::task(id))? {
            Some(raw) => DbKeys::progress(&raw).ok_or(LedgerError::CorruptRecord { id }),
            None => Ok(0),
        }
    }

    fn check_writer(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(reason) => Err(LedgerError::Writer(reason.clone())),
            None => Ok(()),
        }
    }

    fn writer_error(&self) -> LedgerError {
        let reason = self.failure.lock().clone();
        LedgerError::Writer(reason.unwrap_or_else(|| "writer stopped".into()))
    }
}

/// Stop the writer after it drained the queue, then flush sled.
async fn shutdown(open: Open, failure: &Failure) -> Result<sled::Db> {
    let Open { db, tx, writer, .. } = open;
    drop(tx);
    writer
        .await
        .map_err(|e| LedgerError::Writer(e.to_string()))?;
    if let Some(reason) = failure.lock().clone() {
        return Err(LedgerError::Writer(reason));
    }
    db.flush_async().await?;
    Ok(db)
}

fn queue_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ledger_in(dir: &std::path::Path) -> Ledger {
        let paths = PayloadPaths::for_output(dir.join("file.bin")).unwrap();
        Ledger::open(paths).unwrap()
    }

    #[tokio::test]
    async fn fresh_ledger_preallocates_payload() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(dir.path());

        let outcome = ledger.validate_or_init(1024, 256, "tag").unwrap();
        assert_eq!(outcome, Validation::Created);
        assert_eq!(
            parget_fs::payload_len(ledger.paths().payload()).unwrap(),
            Some(1024)
        );
        assert_eq!(ledger.metadata().unwrap(), Some(Metadata::new(1024, 256, "tag")));
        assert_eq!(ledger.get_progress(3).unwrap(), 0);
        ledger.close().await.unwrap();
    }

    #[tokio::test]
    async fn progress_is_readable_before_persisted() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        ledger.validate_or_init(100, 10, "").unwrap();

        ledger.set_progress(2, 4).await.unwrap();
        ledger.set_progress(2, 9).await.unwrap();
        assert_eq!(ledger.get_progress(2).unwrap(), 9);
        assert_eq!(ledger.entries().unwrap(), vec![(2, 9)]);
        ledger.close().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_decreasing_totals() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        ledger.validate_or_init(100, 10, "").unwrap();

        ledger.set_progress(1, 8).await.unwrap();
        let err = ledger.set_progress(1, 5).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Regressed {
                id: 1,
                previous: 8,
                next: 5
            }
        ));
        assert_eq!(ledger.get_progress(1).unwrap(), 8);
        ledger.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_ledger_refuses_work() {
        let dir = tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        ledger.close().await.unwrap();

        assert!(!ledger.is_open());
        assert!(matches!(ledger.get_progress(1), Err(LedgerError::Closed)));
        assert!(matches!(
            ledger.set_progress(1, 1).await,
            Err(LedgerError::Closed)
        ));
        assert!(matches!(ledger.close().await, Err(LedgerError::Closed)));
    }
}
