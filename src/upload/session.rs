use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{
    ERROR_CODE_CANCELLED, ERROR_CODE_NO_WIFI, ERROR_CODE_PARTIAL_FAILURE, INITIAL_CONCURRENCY_BUDGET,
};
use crate::error::UploadError;

/// Why a finished session did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Some batches failed; the rest were delivered.
    PartialFailure,
    /// The connectivity policy stopped the session before all batches ran.
    NoWifi,
    /// The session was dropped before it finished.
    Cancelled,
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::PartialFailure => ERROR_CODE_PARTIAL_FAILURE,
            FailureKind::NoWifi => ERROR_CODE_NO_WIFI,
            FailureKind::Cancelled => ERROR_CODE_CANCELLED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Idle,
    Sending,
    Success,
    Failed(FailureKind),
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Success | SessionStatus::Failed(_))
    }
}

/// Outcome of one upload cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub status: SessionStatus,
    pub error_code: Option<String>,
    /// Envelopes found in the queue at session start.
    pub total: usize,
    /// Envelopes selected for this cycle (bounded by the per-cycle cap).
    pub queued: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Queued envelopes never resolved, only non-zero after an abort.
    pub pending: usize,
    pub skipped: usize,
    pub batches: usize,
    pub batches_attempted: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Counters and status of the current upload cycle.
///
/// Mutated only by the coordinating task; readers see copies through the
/// orchestrator's snapshot.
#[derive(Debug, Clone)]
pub struct UploadSession {
    status: SessionStatus,
    ceiling: usize,
    budget: usize,
    in_flight: usize,
    total: usize,
    queued: usize,
    delivered: usize,
    failed: usize,
    skipped: usize,
    batches: usize,
    pending_batches: usize,
    batches_attempted: usize,
    aborted: Option<FailureKind>,
    last_activity: Option<DateTime<Utc>>,
}

impl UploadSession {
    pub fn new(ceiling: usize) -> Self {
        UploadSession {
            status: SessionStatus::Idle,
            ceiling: ceiling.max(1),
            budget: 0,
            in_flight: 0,
            total: 0,
            queued: 0,
            delivered: 0,
            failed: 0,
            skipped: 0,
            batches: 0,
            pending_batches: 0,
            batches_attempted: 0,
            aborted: None,
            last_activity: None,
        }
    }

    /// Move to `SENDING` with a fixed workload. Rejected while already sending.
    pub fn begin(&mut self, total: usize, queued: usize, batches: usize, skipped: usize) -> Result<(), UploadError> {
        if self.status == SessionStatus::Sending {
            return Err(UploadError::AlreadySending);
        }

        *self = UploadSession {
            status: SessionStatus::Sending,
            budget: INITIAL_CONCURRENCY_BUDGET.min(self.ceiling),
            total,
            queued,
            skipped,
            batches,
            pending_batches: batches,
            last_activity: Some(Utc::now()),
            ..UploadSession::new(self.ceiling)
        };
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Queued envelopes not yet delivered or failed.
    pub fn pending(&self) -> usize {
        self.queued - self.delivered - self.failed
    }

    pub fn pending_batches(&self) -> usize {
        self.pending_batches
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Whether another batch may start now.
    pub fn can_dispatch(&self) -> bool {
        self.status == SessionStatus::Sending
            && self.aborted.is_none()
            && self.in_flight < self.budget
            && self.batches_attempted < self.batches
    }

    pub fn record_dispatch(&mut self) {
        self.in_flight += 1;
        self.batches_attempted += 1;
        self.last_activity = Some(Utc::now());
    }

    /// A batch of `count` envelopes was acknowledged. Widens the budget by
    /// one, up to the ceiling.
    pub fn record_success(&mut self, count: usize) {
        self.settle(count);
        self.delivered += count;
        self.budget = (self.budget + 1).min(self.ceiling);
    }

    pub fn record_failure(&mut self, count: usize) {
        self.settle(count);
        self.failed += count;
    }

    fn settle(&mut self, count: usize) {
        debug_assert!(count <= self.pending());
        self.in_flight = self.in_flight.saturating_sub(1);
        self.pending_batches = self.pending_batches.saturating_sub(1);
        self.last_activity = Some(Utc::now());
    }

    /// Stop dispatching. Batches already in flight still settle.
    pub fn abort(&mut self, kind: FailureKind) {
        if self.aborted.is_none() {
            self.aborted = Some(kind);
        }
    }

    /// Nothing left to wait for: all batches settled, or aborted with none in flight.
    pub fn is_settled(&self) -> bool {
        self.in_flight == 0 && (self.pending_batches == 0 || self.aborted.is_some())
    }

    /// Enter the terminal status, return the report and reset counters for
    /// the next cycle.
    pub fn finalize(&mut self) -> SessionReport {
        let status = match self.aborted {
            Some(kind) => SessionStatus::Failed(kind),
            None if self.failed == 0 => SessionStatus::Success,
            None => SessionStatus::Failed(FailureKind::PartialFailure),
        };
        let error_code = match status {
            SessionStatus::Failed(kind) => Some(kind.code().to_string()),
            _ => None,
        };
        let last_activity = Some(Utc::now());

        let report = SessionReport {
            status,
            error_code,
            total: self.total,
            queued: self.queued,
            delivered: self.delivered,
            failed: self.failed,
            pending: self.pending(),
            skipped: self.skipped,
            batches: self.batches,
            batches_attempted: self.batches_attempted,
            last_activity,
        };

        *self = UploadSession {
            status,
            last_activity,
            ..UploadSession::new(self.ceiling)
        };
        report
    }
}
