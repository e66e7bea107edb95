use std::sync::Arc;

use parget_ledger::{Ledger, Validation};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Configure;
use crate::error::{FetchError, Result};
use crate::plan::RangePlan;
use crate::source::{Probe, Source};
use crate::worker::Job;

/// Outcome of [`Producer::prepare`]: a validated ledger and the plan to emit.
pub struct Prepared {
    pub probe:      Probe,
    pub ledger:     Arc<Ledger>,
    pub plan:       RangePlan,
    pub validation: Validation,
}

/// Probes the resource, sets up the ledger and feeds ranges to the pool.
pub struct Producer<S> {
    conf:   Arc<Configure>,
    source: Arc<S>,
}

impl<S: Source> Producer<S> {
    pub fn new(conf: Arc<Configure>, source: Arc<S>) -> Self { Self { conf, source } }

    /// Probe, then open and validate the ledger.
    ///
    /// Range support is checked before anything touches the disk. Recorded
    /// progress is checked against the plan before any range is fetched.
    pub async fn prepare(&self) -> Result<Prepared> {
        let probe = self.source.probe().await?;
        if !probe.accept_ranges {
            return Err(FetchError::ServerUnsupported);
        }

        let ledger = Ledger::open(self.conf.paths()?)?;
        match self.validate(&ledger, &probe) {
            Ok((plan, validation)) => Ok(Prepared {
                probe,
                ledger: Arc::new(ledger),
                plan,
                validation,
            }),
            Err(e) => {
                if let Err(close) = ledger.close().await {
                    warn!(error = %close, "failed to close ledger");
                }
                Err(e)
            }
        }
    }

    fn validate(&self, ledger: &Ledger, probe: &Probe) -> Result<(RangePlan, Validation)> {
        let block = self.conf.block();
        let validation = ledger.validate_or_init(probe.size, block, &probe.modified)?;
        let plan = RangePlan::new(probe.size, block);

        for (id, progress) in ledger.entries()? {
            let range = plan.get(id).ok_or(FetchError::UnknownRange { id })?;
            if progress > range.len {
                return Err(FetchError::ProgressOverflow {
                    id,
                    progress,
                    len: range.len,
                });
            }
        }
        info!(ranges = plan.ranges(), ?validation, "plan ready");
        Ok((plan, validation))
    }
}

/// Emit every range in order, waiting for a worker to take each one.
pub(crate) async fn emit(
    plan: RangePlan,
    tx: flume::Sender<Job>,
    cancel: CancellationToken,
) -> Result<()> {
    for range in plan {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            sent = tx.send_async(Job::Task(range)) => {
                if sent.is_err() {
                    return Err(FetchError::Cancelled);
                }
            }
        }
    }
    debug!("planning complete");
    Ok(())
}
