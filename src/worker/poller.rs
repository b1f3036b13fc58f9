use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::dispatcher::{Dispatcher, JobOutcome};
use crate::api::client::JobQueue;
use crate::http::state::AgentState;

/// What a single poll did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// Previous batch still running, nothing fetched
    Skipped,
    /// Fetch failed; logged and swallowed
    FetchFailed,
    /// Jobs dispatched in this poll, possibly none
    Dispatched(Vec<JobOutcome>),
}

/// Timer-driven loop pulling pending jobs for this agent
pub struct JobPoller {
    queue: Arc<dyn JobQueue>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<AgentState>,
    poll_interval: Duration,
    batch_limit: usize,
}

impl JobPoller {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        dispatcher: Arc<Dispatcher>,
        state: Arc<AgentState>,
        poll_interval: Duration,
        batch_limit: usize,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            state,
            poll_interval,
            batch_limit,
        }
    }

    /// Fetch one batch and dispatch it sequentially
    ///
    /// Stops taking further jobs from the batch once `shutdown` flips to true;
    /// the remaining jobs stay PENDING on the backend.
    pub async fn poll_once(&self, shutdown: &watch::Receiver<bool>) -> PollResult {
        let Some(_batch) = self.state.try_begin_batch() else {
            debug!("Previous batch still running, skipping poll");
            return PollResult::Skipped;
        };

        let jobs = match self.queue.fetch_pending(self.batch_limit).await {
            Ok(jobs) => {
                self.state.record_poll_ok();
                jobs
            }
            Err(e) => {
                let streak = self.state.record_poll_failure();
                error!("Poll failed ({}), attempt {}: {}", e.kind(), streak, e);
                return PollResult::FetchFailed;
            }
        };

        if jobs.is_empty() {
            return PollResult::Dispatched(Vec::new());
        }

        info!("Found {} pending print jobs", jobs.len());
        let mut outcomes = Vec::with_capacity(jobs.len());
        for (index, entry) in jobs.iter().enumerate() {
            if *shutdown.borrow() {
                warn!(
                    "Shutdown requested, leaving {} jobs pending",
                    jobs.len() - index
                );
                break;
            }
            let outcome = match entry {
                Ok(job) => Some(self.dispatcher.dispatch(job).await),
                Err(undecodable) => self.dispatcher.reject(undecodable).await,
            };
            outcomes.extend(outcome);
        }
        PollResult::Dispatched(outcomes)
    }

    /// Poll on a fixed interval until shutdown is signalled
    ///
    /// Ticks that fall due while a batch is running are dropped, so batches
    /// never overlap. The in-flight batch is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Job poller started (interval {:?}, batch limit {})",
            self.poll_interval, self.batch_limit
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let due = tokio::select! {
                _ = ticker.tick() => Ok(true),
                changed = shutdown.changed() => changed.map(|_| false),
            };
            match due {
                Ok(true) => {
                    self.poll_once(&shutdown).await;
                }
                Ok(false) => {}
                Err(_) => {
                    warn!("Shutdown channel closed, stopping poller");
                    break;
                }
            }
        }

        info!("Job poller stopped");
    }
}
