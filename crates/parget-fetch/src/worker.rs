use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use parget_ledger::Ledger;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{FetchError, Result};
use crate::plan::Range;
use crate::size::{ByteSize, format_duration};
use crate::source::Source;
use crate::speed::{Throughput, eta};
use crate::status::StatusBoard;

/// Message on the distribution queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Task(Range),
    /// Consumed by exactly one worker, which then exits.
    Stop,
}

/// Everything a worker shares with the rest of the run.
pub(crate) struct Shared<S> {
    pub source:  Arc<S>,
    pub ledger:  Arc<Ledger>,
    pub board:   Arc<StatusBoard>,
    pub payload: PathBuf,
    pub cancel:  CancellationToken,
}

impl<S> Clone for Shared<S> {
    fn clone(&self) -> Self {
        Self {
            source:  Arc::clone(&self.source),
            ledger:  Arc::clone(&self.ledger),
            board:   Arc::clone(&self.board),
            payload: self.payload.clone(),
            cancel:  self.cancel.clone(),
        }
    }
}

pub(crate) struct Worker<S> {
    id:     u64,
    shared: Shared<S>,
    speed:  Throughput,
}

impl<S: Source> Worker<S> {
    pub fn new(id: u64, shared: Shared<S>) -> Self {
        Self {
            id,
            shared,
            speed: Throughput::default(),
        }
    }

    /// Pull jobs until the queue closes, a stop arrives or the run is
    /// cancelled. The caller has already counted this worker as active.
    pub async fn serve(mut self, rx: flume::Receiver<Job>) {
        self.post_idle();
        loop {
            let job = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                job = rx.recv_async() => job,
            };
            match job {
                Ok(Job::Task(range)) => {
                    if let Err(e) = self.serve_range(range).await {
                        if !self.shared.cancel.is_cancelled() {
                            self.shared.board.fail(e);
                        }
                        break;
                    }
                }
                Ok(Job::Stop) => {
                    debug!(worker = self.id, "worker stopped");
                    break;
                }
                Err(_) => break,
            }
        }
        self.shared.board.view().worker(self.id, None);
        self.shared.board.worker_left();
    }

    #[instrument(skip(self), fields(worker = self.id))]
    async fn serve_range(&mut self, range: Range) -> Result<()> {
        let ledger = Arc::clone(&self.shared.ledger);
        let board = Arc::clone(&self.shared.board);

        let done = ledger.get_progress(range.id)?;
        if done == range.len {
            board.add_written(done, false);
            self.post("Finish", &range, done);
            debug!("range already complete");
            return Ok(());
        }
        if done > range.len {
            return Err(FetchError::ProgressOverflow {
                id:       range.id,
                progress: done,
                len:      range.len,
            });
        }
        if done > 0 {
            board.add_written(done, false);
            debug!(done, "resuming range");
        }
        self.download(range, done).await
    }

    async fn download(&mut self, range: Range, done: u64) -> Result<()> {
        let Shared {
            source,
            ledger,
            board,
            payload,
            cancel,
        } = self.shared.clone();
        let io = || FetchError::io(&payload);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&payload)
            .await
            .map_err(io())?;
        file.seek(SeekFrom::Start(range.offset + done))
            .await
            .map_err(io())?;

        self.speed.reset();
        self.post("Get", &range, done);
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            stream = source.fetch_range(range.offset + done, range.end() - 1) => stream?,
        };

        let mut written = done;
        while written < range.len {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            let take = chunk.len().min((range.len - written) as usize);
            file.write_all(&chunk[..take]).await.map_err(io())?;
            file.flush().await.map_err(io())?;
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let n = take as u64;
            written += n;
            self.speed.push(n);
            ledger.set_progress(range.id, written).await?;
            board.add_written(n, true);
            let state = if written == range.len { "Finish" } else { "Get" };
            self.post(state, &range, written);
        }

        if written < range.len {
            return Err(FetchError::ShortRead {
                id:       range.id,
                received: written,
                expected: range.len,
            });
        }
        debug!(range = range.id, "range complete");
        Ok(())
    }

    fn post_idle(&self) {
        let line = format!("worker-{}: IDLE", self.id);
        self.shared.board.view().worker(self.id, Some(&line));
    }

    fn post(&mut self, state: &str, range: &Range, download: u64) {
        let mut md = String::new();
        if download != 0 {
            let speed = self.speed.speed();
            if speed != 0 {
                md.push_str(&format!(" [{}/s]", ByteSize(speed)));
                if let Some(left) = eta(range.len - download, speed) {
                    md.push_str(&format!(" {} ETA", format_duration(left)));
                }
            }
        }
        let line = format!(
            "worker-{}: {} step: {} offset: {} download: {}/{}{}",
            self.id,
            state,
            range.id,
            ByteSize(range.offset),
            ByteSize(download),
            ByteSize(range.len),
            md
        );
        self.shared.board.view().worker(self.id, Some(&line));
    }
}
