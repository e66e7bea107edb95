use std::collections::BTreeMap;
use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use console::{Key, Term};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parget_fetch::{Controller, Inbox};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const STATUS_STYLE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_msg}";

const WORKER_STYLE: &str = "  {wide_msg:.dim}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const REFRESH: Duration = Duration::from_millis(100);

static STATUS_TEMPLATE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template(STATUS_STYLE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(TICK)
});

static WORKER_TEMPLATE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template(WORKER_STYLE).unwrap_or_else(|_| ProgressStyle::default_spinner())
});

/// Live terminal display: one status line and one line per worker.
pub struct Renderer {
    multi:   MultiProgress,
    status:  ProgressBar,
    workers: BTreeMap<u64, ProgressBar>,
}

impl Renderer {
    pub fn new(multi: MultiProgress) -> Self {
        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(STATUS_TEMPLATE.clone());
        Self {
            multi,
            status,
            workers: BTreeMap::new(),
        }
    }

    /// Redraw from `inbox` until `done` fires.
    ///
    /// `w` and `s` grow and shrink the pool through `controller`; a Ctrl-C
    /// read while the terminal is in raw mode cancels `run`.
    pub async fn run(
        mut self,
        mut inbox: Inbox,
        controller: Controller,
        run: CancellationToken,
        done: CancellationToken,
    ) {
        let mut keys = read_keys();
        let mut tick = tokio::time::interval(REFRESH);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = tick.tick() => self.refresh(&mut inbox),
                Some(key) = keys.recv() => on_key(key, &controller, &run),
            }
        }
        self.refresh(&mut inbox);
        self.finish(&inbox);
    }

    fn refresh(&mut self, inbox: &mut Inbox) {
        if inbox.status.has_changed().unwrap_or(false) {
            self.status.set_message(inbox.status.borrow_and_update().clone());
        }
        if inbox.workers.has_changed().unwrap_or(false) {
            let lines = inbox.workers.borrow_and_update().clone();
            self.sync_workers(lines);
        }
        self.status.tick();
    }

    fn sync_workers(&mut self, lines: BTreeMap<u64, String>) {
        let multi = &self.multi;
        self.workers.retain(|id, bar| {
            let keep = lines.contains_key(id);
            if !keep {
                bar.finish_and_clear();
                multi.remove(bar);
            }
            keep
        });
        for (id, line) in lines {
            let bar = self.workers.entry(id).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(WORKER_TEMPLATE.clone());
                bar
            });
            bar.set_message(line);
        }
    }

    fn finish(self, inbox: &Inbox) {
        for bar in self.workers.values() {
            bar.finish_and_clear();
        }
        if inbox.error.borrow().is_some() {
            self.status.abandon();
        } else {
            self.status.finish();
        }
    }
}

fn on_key(key: Key, controller: &Controller, run: &CancellationToken) {
    match key {
        Key::Char('w' | 'W') => {
            if !controller.increase() {
                tracing::debug!("worker increase ignored");
            }
        }
        Key::Char('s' | 'S') => {
            if !controller.reduce() {
                tracing::debug!("worker reduce ignored");
            }
        }
        Key::CtrlC => run.cancel(),
        _ => {}
    }
}

/// Keys typed on an interactive terminal. The reader thread is detached:
/// it blocks in `read_key` and exits on the first key after the receiver
/// is gone.
fn read_keys() -> mpsc::UnboundedReceiver<Key> {
    let (tx, rx) = mpsc::unbounded_channel();
    let term = Term::stdout();
    if !term.is_term() {
        return rx;
    }
    std::thread::spawn(move || loop {
        let key = match term.read_key() {
            Ok(key) => key,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Key::CtrlC,
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading keys");
                break;
            }
        };
        let stop = key == Key::CtrlC;
        if tx.send(key).is_err() || stop {
            break;
        }
    });
    rx
}
