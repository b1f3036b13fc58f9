use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Consecutive poll failures after which the agent reports not ready
pub const READY_FAILURE_THRESHOLD: u32 = 3;

/// Live counters shared between the poller, dispatcher and health server
pub struct AgentState {
    agent_id: String,
    started_at: DateTime<Utc>,
    busy: AtomicBool,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    report_failures: AtomicU64,
    consecutive_poll_failures: AtomicU32,
    /// Millis since epoch, 0 when no poll has succeeded yet
    last_poll_ok: AtomicI64,
}

/// Point-in-time copy of [`AgentState`]
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub busy: bool,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub report_failures: u64,
    pub consecutive_poll_failures: u32,
    pub last_poll_ok: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn new(agent_id: &str) -> Self {
        AgentState {
            agent_id: agent_id.into(),
            started_at: Utc::now(),
            busy: AtomicBool::new(false),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            report_failures: AtomicU64::new(0),
            consecutive_poll_failures: AtomicU32::new(0),
            last_poll_ok: AtomicI64::new(0),
        }
    }

    /// Claim the batch slot; `None` if a batch is already running
    pub fn try_begin_batch(&self) -> Option<BatchGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BatchGuard { state: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn record_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_failure(&self) {
        self.report_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_ok(&self) {
        self.consecutive_poll_failures.store(0, Ordering::Relaxed);
        self.last_poll_ok
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Returns the updated failure streak
    pub fn record_poll_failure(&self) -> u32 {
        self.consecutive_poll_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_ready(&self) -> bool {
        self.consecutive_poll_failures.load(Ordering::Relaxed) < READY_FAILURE_THRESHOLD
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let last = self.last_poll_ok.load(Ordering::Relaxed);
        AgentSnapshot {
            agent_id: self.agent_id.clone(),
            started_at: self.started_at,
            busy: self.is_busy(),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
            consecutive_poll_failures: self.consecutive_poll_failures.load(Ordering::Relaxed),
            last_poll_ok: if last == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last).single()
            },
        }
    }
}

/// Holds the batch slot; releases it on drop
pub struct BatchGuard<'a> {
    state: &'a AgentState,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
    }
}
