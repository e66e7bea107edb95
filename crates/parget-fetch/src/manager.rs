use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parget_ledger::{Ledger, Validation};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Configure, max_workers};
use crate::error::{FetchError, Result};
use crate::plan::RangePlan;
use crate::pool::{Pool, Resize};
use crate::producer::{Prepared, Producer, emit};
use crate::source::Source;
use crate::status::{Phase, StatusBoard, View};
use crate::worker::Shared;

type Slot = Arc<OnceLock<Arc<dyn Resize>>>;

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub output:  PathBuf,
    pub size:    u64,
    pub ranges:  u64,
    /// Whether recorded progress from an earlier run was reused.
    pub resumed: bool,
    pub elapsed: Duration,
}

/// Grows or shrinks the worker pool of a running [`Manager`].
///
/// Requests are only honoured while the run is downloading and ranges are
/// still being handed out; once the last range is queued the pool drains on
/// its own. Each call reports whether it was accepted. Calls may come from
/// any thread.
#[derive(Clone, Default)]
pub struct Controller {
    pool: Slot,
}

impl Controller {
    pub fn increase(&self) -> bool { self.pool.get().is_some_and(|pool| pool.increase()) }

    pub fn reduce(&self) -> bool { self.pool.get().is_some_and(|pool| pool.reduce()) }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("running", &self.pool.get().is_some())
            .finish()
    }
}

/// Drives one download from probe to commit.
pub struct Manager<S> {
    conf:   Arc<Configure>,
    source: Arc<S>,
    view:   Arc<dyn View>,
    pool:   Slot,
}

impl<S: Source> Manager<S> {
    pub fn new(conf: Arc<Configure>, source: S, view: Arc<dyn View>) -> Self {
        Self {
            conf,
            source: Arc::new(source),
            view,
            pool: Slot::default(),
        }
    }

    pub fn controller(&self) -> Controller {
        Controller {
            pool: Arc::clone(&self.pool),
        }
    }

    /// Run the download to completion.
    ///
    /// On success the payload has been renamed onto the output path and the
    /// ledger removed. On failure the ledger and payload stay on disk so a
    /// later run resumes; the first error reported by any task is returned.
    pub async fn serve(self, cancel: CancellationToken) -> Result<Report> {
        let started = Instant::now();
        let run = cancel.child_token();
        let board = Arc::new(StatusBoard::new(Arc::clone(&self.view), run.clone()));
        self.view.configure(&self.conf.summary());

        let producer = Producer::new(Arc::clone(&self.conf), Arc::clone(&self.source));
        let prepared = tokio::select! {
            biased;
            _ = run.cancelled() => Err(FetchError::Cancelled),
            prepared = producer.prepare() => prepared,
        };
        let Prepared {
            probe,
            ledger,
            plan,
            validation,
        } = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                board.fail(e);
                return Err(terminal_error(&board));
            }
        };

        let workers = self.conf.workers();
        board.begin_download(probe.size, workers);

        let (tx, rx) = flume::bounded(0);
        let shared = Shared {
            source:  Arc::clone(&self.source),
            ledger:  Arc::clone(&ledger),
            board:   Arc::clone(&board),
            payload: ledger.paths().payload().to_path_buf(),
            cancel:  run.clone(),
        };
        let pool = Arc::new(Pool::new(shared, max_workers().max(workers), tx.clone(), rx));
        pool.start(workers);
        // `serve` consumes the manager, so the slot is still empty.
        self.pool.set(Arc::clone(&pool) as Arc<dyn Resize>).ok();

        let emitter = tokio::spawn({
            let (plan, run) = (plan.clone(), run.clone());
            let (pool, board) = (Arc::clone(&pool), Arc::clone(&board));
            async move {
                match emit(plan, tx, run).await {
                    Ok(()) => {
                        pool.planning_done();
                        board.producer_done();
                    }
                    Err(FetchError::Cancelled) => pool.planning_done(),
                    Err(e) => {
                        pool.planning_done();
                        board.fail(e);
                    }
                }
            }
        });

        let mut phase = board.subscribe();
        let reached = tokio::select! {
            _ = run.cancelled() => Phase::Error,
            reached = phase.wait_for(|p| matches!(p, Phase::Merge | Phase::Error)) => {
                reached.map(|p| *p).unwrap_or(Phase::Error)
            }
        };
        if reached == Phase::Error {
            board.fail(FetchError::Cancelled);
        }

        if let Err(e) = emitter.await {
            board.fail(e.into());
        }
        let mut tasks = pool.take_tasks();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                board.fail(e.into());
            }
        }

        if board.phase() == Phase::Merge {
            match commit(&ledger, &plan, &board).await {
                Ok(()) => {
                    board.succeed();
                    let report = Report {
                        output:  self.conf.output().to_path_buf(),
                        size:    plan.size(),
                        ranges:  plan.ranges(),
                        resumed: validation == Validation::Resumed,
                        elapsed: started.elapsed(),
                    };
                    info!(?report, "download finished");
                    return Ok(report);
                }
                Err(e) => {
                    board.fail(e);
                }
            }
        }

        if ledger.is_open() {
            if let Err(e) = ledger.close().await {
                warn!(error = %e, "failed to close ledger");
            }
        }
        Err(terminal_error(&board))
    }
}

/// Verify every planned range is on disk, then commit the payload.
async fn commit(ledger: &Ledger, plan: &RangePlan, board: &StatusBoard) -> Result<()> {
    for range in plan.clone() {
        let progress = ledger.get_progress(range.id)?;
        if progress != range.len {
            return Err(FetchError::Incomplete {
                id: range.id,
                progress,
                len: range.len,
            });
        }
    }
    let downloaded = board.snapshot().downloaded;
    if downloaded != plan.size() {
        return Err(FetchError::SizeMismatch {
            downloaded,
            size: plan.size(),
        });
    }
    ledger.finalize().await?;
    Ok(())
}

fn terminal_error(board: &StatusBoard) -> FetchError {
    board.take_error().unwrap_or(FetchError::Cancelled)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use parget_fs::PayloadPaths;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    use super::*;
    use crate::source::memory::MemorySource;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<String>>,
        errors:   Mutex<Vec<String>>,
    }

    impl Recorder {
        fn saw_phase(&self, phase: Phase) -> Option<usize> {
            let prefix = format!("{phase} ");
            self.statuses.lock().iter().position(|s| s.starts_with(&prefix))
        }

        fn last_status(&self) -> String { self.statuses.lock().last().cloned().unwrap_or_default() }
    }

    impl View for Recorder {
        fn configure(&self, _summary: &str) {}

        fn status(&self, line: &str) { self.statuses.lock().push(line.to_string()); }

        fn worker(&self, _id: u64, _line: Option<&str>) {}

        fn error(&self, err: &FetchError) { self.errors.lock().push(err.to_string()); }
    }

    fn conf(dir: &Path, workers: usize, block: u64) -> Arc<Configure> {
        Arc::new(
            Configure::builder("http://127.0.0.1:9/file.bin")
                .output(dir.join("file.bin"))
                .workers(workers)
                .block(block)
                .build()
                .unwrap(),
        )
    }

    async fn run(
        conf: Arc<Configure>,
        source: MemorySource,
    ) -> (Result<Report>, Arc<Recorder>, Arc<MemorySource>) {
        let recorder = Arc::new(Recorder::default());
        let manager = Manager::new(conf, source, Arc::clone(&recorder) as Arc<dyn View>);
        let source = Arc::clone(&manager.source);
        let result = manager.serve(CancellationToken::new()).await;
        (result, recorder, source)
    }

    #[tokio::test]
    async fn downloads_in_four_ranges() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 3, 3_000_000);
        let source = MemorySource::patterned(10_000_000);
        let expected = source.data.clone();

        let (result, recorder, source) = run(Arc::clone(&conf), source).await;
        let report = result.unwrap();

        assert_eq!(report.size, 10_000_000);
        assert_eq!(report.ranges, 4);
        assert!(!report.resumed);
        assert_eq!(source.fetches(), 4);
        assert_eq!(std::fs::read(conf.output()).unwrap(), expected);

        let paths = conf.paths().unwrap();
        assert!(!paths.payload().exists());
        assert!(!paths.store().exists());

        let merge = recorder.saw_phase(Phase::Merge).unwrap();
        let success = recorder.saw_phase(Phase::Success).unwrap();
        assert!(merge < success);
        assert!(recorder.last_status().contains("download: 9m549k640b/9m549k640b"));
    }

    #[tokio::test]
    async fn resumes_from_recorded_progress() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 2, 300);
        let source = MemorySource::patterned(1000);
        let data = source.data.clone();

        let ledger = Ledger::open(conf.paths().unwrap()).unwrap();
        ledger.validate_or_init(1000, 300, &source.modified).unwrap();
        let mut payload = vec![0u8; 1000];
        payload[..450].copy_from_slice(&data[..450]);
        std::fs::write(conf.paths().unwrap().payload(), &payload).unwrap();
        ledger.set_progress(1, 300).await.unwrap();
        ledger.set_progress(2, 150).await.unwrap();
        ledger.close().await.unwrap();
        drop(ledger);

        let (result, _recorder, source) = run(Arc::clone(&conf), source).await;
        let report = result.unwrap();

        assert!(report.resumed);
        assert_eq!(source.fetches(), 3, "range 1 needs no request");
        assert_eq!(std::fs::read(conf.output()).unwrap(), data);
    }

    #[tokio::test]
    async fn short_read_keeps_received_bytes_for_next_run() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 1, 100);
        let source = MemorySource::patterned(1000).truncated(100, 40);
        let data = source.data.clone();

        let (result, recorder, _source) = run(Arc::clone(&conf), source).await;
        assert!(matches!(
            result.unwrap_err(),
            FetchError::ShortRead {
                id:       2,
                received: 40,
                expected: 100
            }
        ));
        assert!(conf.paths().unwrap().store().exists());
        assert!(recorder.saw_phase(Phase::Error).is_some());

        let source = MemorySource::patterned(1000);
        let (result, _recorder, source) = run(Arc::clone(&conf), source).await;
        assert!(result.unwrap().resumed);
        let starts = source.starts();
        assert_eq!(starts.first(), Some(&140));
        assert!(!starts.contains(&0) && !starts.contains(&100));
        assert_eq!(std::fs::read(conf.output()).unwrap(), data);
    }

    #[tokio::test]
    async fn overflowing_progress_is_rejected_before_fetching() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 2, 300);
        let source = MemorySource::patterned(1000);

        let ledger = Ledger::open(conf.paths().unwrap()).unwrap();
        ledger.validate_or_init(1000, 300, &source.modified).unwrap();
        ledger.set_progress(2, 301).await.unwrap();
        ledger.close().await.unwrap();
        drop(ledger);

        let (result, recorder, source) = run(Arc::clone(&conf), source).await;
        let err = result.unwrap_err();

        assert!(matches!(
            err,
            FetchError::ProgressOverflow {
                id: 2,
                progress: 301,
                len: 300
            }
        ));
        assert_eq!(source.fetches(), 0);
        assert!(conf.paths().unwrap().store().exists());
        assert!(recorder.saw_phase(Phase::Error).is_some());
    }

    #[tokio::test]
    async fn missing_range_support_leaves_no_ledger() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 2, 300);
        let mut source = MemorySource::patterned(1000);
        source.accept_ranges = false;

        let (result, recorder, _source) = run(Arc::clone(&conf), source).await;

        assert!(matches!(result, Err(FetchError::ServerUnsupported)));
        let paths: PayloadPaths = conf.paths().unwrap();
        assert!(!paths.store().exists());
        assert!(!paths.payload().exists());
        assert_eq!(recorder.errors.lock().len(), 1);
        assert!(recorder.saw_phase(Phase::Download).is_none());
    }

    #[tokio::test]
    async fn empty_resource_commits_empty_file() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 2, 300);

        let source = MemorySource::new(Vec::new());
        let (result, _recorder, source) = run(Arc::clone(&conf), source).await;

        assert_eq!(result.unwrap().ranges, 0);
        assert_eq!(source.fetches(), 0);
        assert_eq!(std::fs::metadata(conf.output()).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn pool_resizes_while_downloading() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 1, 100);
        let source = MemorySource::patterned(1000).gated();
        let gate = source.gate();
        let data = source.data.clone();

        let recorder = Arc::new(Recorder::default());
        let view = Arc::clone(&recorder) as Arc<dyn View>;
        let manager = Manager::new(Arc::clone(&conf), source, view);
        let ctl = manager.controller();
        assert!(!ctl.increase(), "not running yet");

        let handle = tokio::spawn(manager.serve(CancellationToken::new()));
        while recorder.saw_phase(Phase::Download).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!ctl.reduce(), "never below one worker");
        assert!(ctl.increase());
        assert!(ctl.reduce());
        gate.add_permits(1000);

        handle.await.unwrap().unwrap();
        assert_eq!(std::fs::read(conf.output()).unwrap(), data);
        assert!(!ctl.increase(), "finished runs reject resizing");
    }

    #[tokio::test]
    async fn controller_works_outside_the_runtime() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 2, 100);
        let source = MemorySource::patterned(1000).gated();
        let gate = source.gate();
        let data = source.data.clone();

        let recorder = Arc::new(Recorder::default());
        let view = Arc::clone(&recorder) as Arc<dyn View>;
        let manager = Manager::new(Arc::clone(&conf), source, view);
        let ctl = manager.controller();

        let handle = tokio::spawn(manager.serve(CancellationToken::new()));
        while recorder.saw_phase(Phase::Download).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (grown, shrunk) = std::thread::spawn(move || (ctl.increase(), ctl.reduce()))
            .join()
            .unwrap();
        assert!(grown && shrunk);
        gate.add_permits(1000);

        handle.await.unwrap().unwrap();
        assert_eq!(std::fs::read(conf.output()).unwrap(), data);
    }

    #[tokio::test]
    async fn cancellation_keeps_ledger() {
        let dir = tempdir().unwrap();
        let conf = conf(dir.path(), 2, 100);
        let source = MemorySource::patterned(1000).gated();

        let recorder = Arc::new(Recorder::default());
        let view = Arc::clone(&recorder) as Arc<dyn View>;
        let manager = Manager::new(Arc::clone(&conf), source, view);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(manager.serve(cancel.clone()));
        while recorder.saw_phase(Phase::Download).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        let paths = conf.paths().unwrap();
        assert!(paths.store().exists());
        assert!(paths.payload().exists());
        assert!(!paths.output().exists());
    }
}
