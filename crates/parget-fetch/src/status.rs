use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::size::{ByteSize, format_duration};
use crate::speed::{Throughput, eta};

/// Run-wide lifecycle.
///
/// `Init -> Download -> Merge -> Success`; `Error` absorbs from any
/// non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    Download,
    Merge,
    Success,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool { matches!(self, Phase::Success | Phase::Error) }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "Init"),
            Phase::Download => write!(f, "Download"),
            Phase::Merge => write!(f, "Merge"),
            Phase::Success => write!(f, "Success"),
            Phase::Error => write!(f, "Error"),
        }
    }
}

/// Receives everything a front end shows.
///
/// Calls arrive from worker tasks and must not block.
pub trait View: Send + Sync + 'static {
    fn configure(&self, summary: &str);

    fn status(&self, line: &str);

    /// `None` removes the worker's line.
    fn worker(&self, id: u64, line: Option<&str>);

    fn error(&self, err: &FetchError);
}

/// [`View`] backed by one latest-value-wins slot per screen region.
#[derive(Debug)]
pub struct Mailboxes {
    configure: watch::Sender<String>,
    status:    watch::Sender<String>,
    workers:   watch::Sender<BTreeMap<u64, String>>,
    error:     watch::Sender<Option<String>>,
}

/// Receiving ends of [`Mailboxes`], drained by a renderer at its own pace.
#[derive(Debug, Clone)]
pub struct Inbox {
    pub configure: watch::Receiver<String>,
    pub status:    watch::Receiver<String>,
    pub workers:   watch::Receiver<BTreeMap<u64, String>>,
    pub error:     watch::Receiver<Option<String>>,
}

impl Mailboxes {
    pub fn new() -> (Self, Inbox) {
        let (configure, configure_rx) = watch::channel(String::new());
        let (status, status_rx) = watch::channel(String::new());
        let (workers, workers_rx) = watch::channel(BTreeMap::new());
        let (error, error_rx) = watch::channel(None);
        (
            Self {
                configure,
                status,
                workers,
                error,
            },
            Inbox {
                configure: configure_rx,
                status:    status_rx,
                workers:   workers_rx,
                error:     error_rx,
            },
        )
    }
}

impl View for Mailboxes {
    fn configure(&self, summary: &str) { self.configure.send_replace(summary.to_string()); }

    fn status(&self, line: &str) { self.status.send_replace(line.to_string()); }

    fn worker(&self, id: u64, line: Option<&str>) {
        self.workers.send_modify(|lines| match line {
            Some(line) => {
                lines.insert(id, line.to_string());
            }
            None => {
                lines.remove(&id);
            }
        });
    }

    fn error(&self, err: &FetchError) { self.error.send_replace(Some(err.to_string())); }
}

/// Point-in-time copy of the aggregate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub phase:      Phase,
    pub size:       u64,
    pub downloaded: u64,
    pub active:     usize,
    pub expected:   usize,
}

#[derive(Debug, Default)]
struct Board {
    phase:         Phase,
    size:          u64,
    downloaded:    u64,
    active:        usize,
    expected:      usize,
    planning_done: bool,
    speed:         Throughput,
    error:         Option<FetchError>,
}

impl Board {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase:      self.phase,
            size:       self.size,
            downloaded: self.downloaded,
            active:     self.active,
            expected:   self.expected,
        }
    }

    fn line(&mut self) -> String {
        let mut md = String::new();
        let speed = self.speed.speed();
        if speed != 0 {
            md.push_str(&format!(" [{}/s]", ByteSize(speed)));
            if let Some(left) = eta(self.size.saturating_sub(self.downloaded), speed) {
                md.push_str(&format!(" {} ETA", format_duration(left)));
            }
        }
        format!(
            "{} workers: {}/{} download: {}/{}{}",
            self.phase,
            self.active,
            self.expected,
            ByteSize(self.downloaded),
            ByteSize(self.size),
            md
        )
    }

    /// Download finished once planning is done and the last worker left.
    fn try_merge(&mut self) -> bool {
        if self.phase == Phase::Download && self.planning_done && self.active == 0 {
            self.phase = Phase::Merge;
            return true;
        }
        false
    }
}

/// Aggregate state of one run, behind a single lock.
///
/// Every mutation republishes the status line to the view; phase changes are
/// also broadcast on a watch channel the manager waits on.
pub struct StatusBoard {
    board:  Mutex<Board>,
    phase:  watch::Sender<Phase>,
    view:   Arc<dyn View>,
    cancel: CancellationToken,
}

impl StatusBoard {
    pub fn new(view: Arc<dyn View>, cancel: CancellationToken) -> Self {
        Self {
            board: Mutex::new(Board::default()),
            phase: watch::Sender::new(Phase::Init),
            view,
            cancel,
        }
    }

    pub fn view(&self) -> &Arc<dyn View> { &self.view }

    pub fn cancel_token(&self) -> &CancellationToken { &self.cancel }

    pub fn subscribe(&self) -> watch::Receiver<Phase> { self.phase.subscribe() }

    pub fn phase(&self) -> Phase { self.board.lock().phase }

    pub fn snapshot(&self) -> Snapshot { self.board.lock().snapshot() }

    /// Enter `Download` for a resource of `size` bytes with `workers` planned.
    pub fn begin_download(&self, size: u64, workers: usize) -> bool {
        self.update(|b| {
            if b.phase != Phase::Init {
                return false;
            }
            b.phase = Phase::Download;
            b.size = size;
            b.expected = workers;
            true
        })
    }

    /// Account `n` bytes confirmed on disk. Bytes found already on disk at
    /// resume (`net == false`) count toward progress but not throughput.
    pub fn add_written(&self, n: u64, net: bool) {
        self.update(|b| {
            b.downloaded += n;
            if net {
                b.speed.push(n);
            }
        })
    }

    pub fn worker_joined(&self) { self.update(|b| b.active += 1) }

    pub fn worker_left(&self) {
        self.update(|b| {
            b.active = b.active.saturating_sub(1);
            b.try_merge()
        });
    }

    pub fn producer_done(&self) {
        self.update(|b| {
            b.planning_done = true;
            b.try_merge()
        });
    }

    /// Grow the expected pool size unless at `max`, outside `Download`, or
    /// after every range has been handed out.
    pub fn try_grow(&self, max: usize) -> bool {
        self.update(|b| {
            if b.phase != Phase::Download || b.planning_done || b.expected >= max {
                return false;
            }
            b.expected += 1;
            true
        })
    }

    /// Shrink the expected pool size unless at one, outside `Download`, or
    /// after every range has been handed out.
    pub fn try_shrink(&self) -> bool {
        self.update(|b| {
            if b.phase != Phase::Download || b.planning_done || b.expected <= 1 {
                return false;
            }
            b.expected -= 1;
            true
        })
    }

    /// Record the run's terminal error. The first report wins; later ones
    /// and reports after `Success` are dropped. Cancels the run.
    ///
    /// The view is called with the lock released; the error is stored
    /// before the `Error` phase is published.
    pub fn fail(&self, err: FetchError) -> bool {
        let accepted = {
            let mut b = self.board.lock();
            if b.phase.is_terminal() {
                None
            } else {
                let from = b.phase;
                b.phase = Phase::Error;
                Some((from, b.line()))
            }
        };
        if let Some((from, line)) = &accepted {
            tracing::error!(error = %err, phase = %from, "download failed");
            self.view.error(&err);
            self.view.status(line);
            self.board.lock().error = Some(err);
            self.phase.send_replace(Phase::Error);
        }
        self.cancel.cancel();
        accepted.is_some()
    }

    /// `Merge -> Success`, after the payload was committed.
    pub fn succeed(&self) -> bool {
        self.update(|b| {
            if b.phase != Phase::Merge {
                return false;
            }
            b.phase = Phase::Success;
            true
        })
    }

    pub fn take_error(&self) -> Option<FetchError> { self.board.lock().error.take() }

    /// Apply `f` under the lock, then publish the status line and any phase
    /// change.
    fn update<R>(&self, f: impl FnOnce(&mut Board) -> R) -> R {
        let (result, line, before, after) = {
            let mut b = self.board.lock();
            let before = b.phase;
            let result = f(&mut b);
            (result, b.line(), before, b.phase)
        };
        self.view.status(&line);
        if before != after {
            tracing::info!(from = %before, to = %after, "phase changed");
            self.phase.send_replace(after);
        }
        result
    }
}
