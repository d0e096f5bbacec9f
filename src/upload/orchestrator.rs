use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::task::JoinSet;

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_BATCHES, DEFAULT_MAX_TO_SEND};
use crate::error::UploadError;
use crate::security::safe_error_message;
use crate::trigger::connectivity::ConnectivityGate;
use crate::upload::batch::{Batch, BatchBuilder};
use crate::upload::session::{FailureKind, SessionReport, SessionStatus, UploadSession};
use crate::upload::transport::{BatchTransport, DeliveryReceipt};

/// Orchestration limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub max_to_send: usize,
    pub max_concurrent_batches: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            max_to_send: DEFAULT_MAX_TO_SEND,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
        }
    }
}

type BatchOutcome = (usize, Result<DeliveryReceipt, UploadError>);

/// Runs upload sessions over a ciphertext queue directory.
///
/// One session at a time. Batches run as tasks in a `JoinSet`; their
/// outcomes are applied to the session by the task that called
/// [`run_session`](Self::run_session), so counters have a single writer.
/// Concurrency starts at one batch and widens by one per delivered batch.
pub struct UploadOrchestrator {
    transport: Arc<dyn BatchTransport>,
    connectivity: ConnectivityGate,
    builder: BatchBuilder,
    session: Mutex<UploadSession>,
    last_report: Mutex<Option<SessionReport>>,
}

impl UploadOrchestrator {
    pub fn new(
        transport: Arc<dyn BatchTransport>,
        connectivity: ConnectivityGate,
        config: OrchestratorConfig,
    ) -> Self {
        UploadOrchestrator {
            transport,
            connectivity,
            builder: BatchBuilder::new(config.batch_size, config.max_to_send),
            session: Mutex::new(UploadSession::new(config.max_concurrent_batches)),
            last_report: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, UploadSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current session counters.
    pub fn snapshot(&self) -> UploadSession {
        self.session().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.session().status()
    }

    pub fn last_report(&self) -> Option<SessionReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Upload everything currently queued in `queue_dir`.
    ///
    /// Returns `Err` only when the session could not start (already sending,
    /// queue unreadable). Batch failures and connectivity aborts are part of
    /// the returned report.
    pub async fn run_session(&self, queue_dir: &Path) -> Result<SessionReport, UploadError> {
        if self.status() == SessionStatus::Sending {
            return Err(UploadError::AlreadySending);
        }

        let scan = self.builder.scan(queue_dir)?;
        let total = scan.envelopes.len();
        let skipped = scan.skipped.len();
        let batches = self.builder.partition(scan.envelopes);
        let queued: usize = batches.iter().map(Batch::len).sum();

        self.session().begin(total, queued, batches.len(), skipped)?;
        info!(
            "Upload session started: {} envelopes queued of {} found in {} batches ({} skipped)",
            queued,
            total,
            batches.len(),
            skipped
        );

        let start = Instant::now();
        let mut waiting: VecDeque<Batch> = batches.into();
        let mut run = SessionRun::new(self);
        let mut tasks: JoinSet<BatchOutcome> = JoinSet::new();

        loop {
            self.dispatch(&mut waiting, &mut run.in_flight, &mut tasks).await;
            if self.session().is_settled() {
                break;
            }

            match tasks.join_next().await {
                Some(Ok((index, result))) => match run.in_flight.remove(&index) {
                    Some(batch) => self.settle(batch, result),
                    None => warn!("Outcome for unknown batch {}", index + 1),
                },
                Some(Err(e)) => error!("Batch task failed to complete: {}", e),
                None => break,
            }
        }

        let report = run.finish();
        match report.status {
            SessionStatus::Success => info!(
                "Upload session succeeded: {} delivered in {:?}",
                report.delivered,
                start.elapsed()
            ),
            _ => warn!(
                "Upload session failed ({}): {} delivered, {} failed, {} pending",
                report.error_code.as_deref().unwrap_or("UNKNOWN"),
                report.delivered,
                report.failed,
                report.pending
            ),
        }
        Ok(report)
    }

    /// Start batches until the budget is used up, the queue is empty or the
    /// connectivity policy refuses. The probe is sampled once per round,
    /// before the session lock is taken.
    async fn dispatch(
        &self,
        waiting: &mut VecDeque<Batch>,
        in_flight: &mut HashMap<usize, Batch>,
        tasks: &mut JoinSet<BatchOutcome>,
    ) {
        if !self.session().can_dispatch() {
            return;
        }
        let permitted = self.connectivity.permits_now().await;

        let mut session = self.session();
        if !permitted {
            warn!(
                "No unmetered connection under {:?}; abandoning {} remaining batches",
                self.connectivity.policy(),
                waiting.len()
            );
            session.abort(FailureKind::NoWifi);
            return;
        }

        while session.can_dispatch() {
            let batch = match waiting.pop_front() {
                Some(batch) => batch,
                None => break,
            };
            session.record_dispatch();
            debug!(
                "Dispatching batch {} ({} envelopes, {}/{} in flight)",
                batch.index + 1,
                batch.len(),
                session.in_flight(),
                session.budget()
            );

            let transport = Arc::clone(&self.transport);
            let task_batch = batch.clone();
            in_flight.insert(batch.index, batch);
            tasks.spawn(async move {
                let result = AssertUnwindSafe(transport.submit(&task_batch))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(UploadError::Aborted(panic_message(panic))));
                (task_batch.index, result)
            });
        }
    }

    /// Enter the terminal status and publish the report.
    fn close_session(&self) -> SessionReport {
        let report = self.session().finalize();
        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        report
    }

    fn settle(&self, batch: Batch, result: Result<DeliveryReceipt, UploadError>) {
        match result {
            Ok(receipt) => {
                delete_delivered(&batch);
                info!(
                    "Batch {} delivered ({} envelopes, status {})",
                    batch.index + 1,
                    batch.len(),
                    receipt.status
                );
                self.session().record_success(batch.len());
            }
            Err(e) => {
                warn!(
                    "{}; {} envelopes retained{}",
                    safe_error_message(&format!("Batch {} failed", batch.index + 1), &e),
                    batch.len(),
                    if e.is_retryable() { " for the next cycle" } else { "" }
                );
                if let UploadError::Server { body, .. } = &e {
                    debug!("Server response: {}", safe_error_message("body", body));
                }
                self.session().record_failure(batch.len());
            }
        }
    }
}

/// Batches in flight for one `run_session` call.
///
/// If the call is dropped before it finishes, the drop settles the session:
/// in-flight batches count as failed and keep their files, and the session
/// ends `Failed(Cancelled)` so the next cycle can start.
struct SessionRun<'a> {
    orchestrator: &'a UploadOrchestrator,
    in_flight: HashMap<usize, Batch>,
    finished: bool,
}

impl<'a> SessionRun<'a> {
    fn new(orchestrator: &'a UploadOrchestrator) -> Self {
        SessionRun {
            orchestrator,
            in_flight: HashMap::new(),
            finished: false,
        }
    }

    fn fail_in_flight(&mut self) {
        let mut session = self.orchestrator.session();
        for (_, batch) in self.in_flight.drain() {
            warn!("Batch {} ended without an outcome; files retained", batch.index + 1);
            session.record_failure(batch.len());
        }
    }

    fn finish(mut self) -> SessionReport {
        self.finished = true;
        self.fail_in_flight();
        self.orchestrator.close_session()
    }
}

impl Drop for SessionRun<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("Upload session cancelled with {} batches in flight", self.in_flight.len());
        self.fail_in_flight();
        self.orchestrator.session().abort(FailureKind::Cancelled);
        self.orchestrator.close_session();
    }
}

/// Remove a delivered batch's envelopes and sidecars.
fn delete_delivered(batch: &Batch) {
    for envelope in &batch.envelopes {
        for path in envelope.owned_paths() {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!("Delivered {} but could not delete it: {}", path.display(), e);
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "batch task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{envelope_name, write_envelope};
    use crate::test_utils::transport::ScriptedTransport;
    use crate::trigger::connectivity::{ConnectivityPolicy, MockConnectivityProbe, StaticConnectivity};
    use std::time::Duration;
    use tempfile::TempDir;

    fn orchestrator(transport: Arc<ScriptedTransport>, wifi: bool, batch_size: usize) -> UploadOrchestrator {
        UploadOrchestrator::new(
            transport,
            ConnectivityGate::new(ConnectivityPolicy::WifiOnly, Arc::new(StaticConnectivity(wifi))),
            OrchestratorConfig {
                batch_size,
                max_to_send: 0,
                max_concurrent_batches: 10,
            },
        )
    }

    fn fill_queue(dir: &Path, count: usize) {
        for i in 0..count {
            write_envelope(dir, i, true);
        }
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_all_batches_delivered() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 5);
        let transport = Arc::new(ScriptedTransport::always_ok());

        let report = orchestrator(transport.clone(), true, 2).run_session(dir.path()).await.unwrap();

        assert_eq!(report.status, SessionStatus::Success);
        assert_eq!((report.total, report.delivered, report.failed), (5, 5, 0));
        assert_eq!(report.batches, 3);
        assert!(remaining(dir.path()).is_empty());
        assert_eq!(transport.submitted().len(), 3);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_only_failed_batch() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 6);
        let transport = Arc::new(ScriptedTransport::failing_batches(&[1], 500));

        let report = orchestrator(transport, true, 2).run_session(dir.path()).await.unwrap();

        assert_eq!(report.status, SessionStatus::Failed(FailureKind::PartialFailure));
        assert_eq!((report.delivered, report.failed, report.pending), (4, 2, 0));
        assert_eq!(
            remaining(dir.path()),
            vec![
                envelope_name(2),
                format!("{}.key.json", envelope_name(2)),
                envelope_name(3),
                format!("{}.key.json", envelope_name(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_wifi_aborts_before_any_batch() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 3);
        let transport = Arc::new(ScriptedTransport::always_ok());

        let report = orchestrator(transport.clone(), false, 1).run_session(dir.path()).await.unwrap();

        assert_eq!(report.status, SessionStatus::Failed(FailureKind::NoWifi));
        assert_eq!(report.error_code.as_deref(), Some("NOWIFI"));
        assert_eq!(report.batches_attempted, 0);
        assert_eq!(report.pending, 3);
        assert!(transport.submitted().is_empty());
        assert_eq!(remaining(dir.path()).len(), 6);
    }

    #[tokio::test]
    async fn test_wifi_lost_mid_session_stops_dispatch() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 3);
        let transport = Arc::new(ScriptedTransport::always_ok());
        let mut probe = MockConnectivityProbe::new();
        let mut answers = vec![true, false].into_iter();
        probe
            .expect_has_unmetered_transport()
            .returning(move || answers.next().unwrap_or(false));

        let orchestrator = UploadOrchestrator::new(
            transport.clone(),
            ConnectivityGate::new(ConnectivityPolicy::WifiOnly, Arc::new(probe)),
            OrchestratorConfig { batch_size: 1, max_to_send: 0, max_concurrent_batches: 10 },
        );
        let report = orchestrator.run_session(dir.path()).await.unwrap();

        assert_eq!(report.status, SessionStatus::Failed(FailureKind::NoWifi));
        assert_eq!((report.delivered, report.pending), (1, 2));
        assert_eq!(transport.submitted().len(), 1);
        assert_eq!(remaining(dir.path()).len(), 4);
    }

    #[tokio::test]
    async fn test_allow_metered_ignores_probe() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 2);
        let orchestrator = UploadOrchestrator::new(
            Arc::new(ScriptedTransport::always_ok()),
            ConnectivityGate::new(ConnectivityPolicy::AllowMetered, Arc::new(StaticConnectivity(false))),
            OrchestratorConfig::default(),
        );

        let report = orchestrator.run_session(dir.path()).await.unwrap();
        assert_eq!(report.status, SessionStatus::Success);
    }

    #[tokio::test]
    async fn test_empty_queue_succeeds_without_requests() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always_ok());

        let report = orchestrator(transport.clone(), false, 10).run_session(dir.path()).await.unwrap();

        assert_eq!(report.status, SessionStatus::Success);
        assert_eq!(report.total, 0);
        assert!(transport.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_max_to_send_caps_cycle() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 5);
        let orchestrator = UploadOrchestrator::new(
            Arc::new(ScriptedTransport::always_ok()),
            ConnectivityGate::new(ConnectivityPolicy::WifiOnly, Arc::new(StaticConnectivity(true))),
            OrchestratorConfig { batch_size: 2, max_to_send: 3, max_concurrent_batches: 10 },
        );

        let report = orchestrator.run_session(dir.path()).await.unwrap();

        assert_eq!((report.total, report.queued, report.delivered), (5, 3, 3));
        assert_eq!(remaining(dir.path()).len(), 4);
    }

    #[tokio::test]
    async fn test_panicking_transport_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 2);
        let transport = Arc::new(ScriptedTransport::panicking_batches(&[0]));

        let report = orchestrator(transport, true, 1).run_session(dir.path()).await.unwrap();

        assert_eq!((report.delivered, report.failed), (1, 1));
        assert_eq!(report.status, SessionStatus::Failed(FailureKind::PartialFailure));
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_budget() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 20);
        let transport = Arc::new(ScriptedTransport::always_ok().with_delay_ms(5));
        let orchestrator = UploadOrchestrator::new(
            transport.clone(),
            ConnectivityGate::new(ConnectivityPolicy::WifiOnly, Arc::new(StaticConnectivity(true))),
            OrchestratorConfig { batch_size: 1, max_to_send: 0, max_concurrent_batches: 3 },
        );

        let report = orchestrator.run_session(dir.path()).await.unwrap();

        assert_eq!(report.delivered, 20);
        assert!(transport.max_concurrency() <= 3);
        assert_eq!(orchestrator.snapshot().budget(), 0);
        assert_eq!(orchestrator.last_report(), Some(report));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_settles_and_next_cycle_runs() {
        let dir = TempDir::new().unwrap();
        fill_queue(dir.path(), 2);
        let orchestrator = UploadOrchestrator::new(
            Arc::new(ScriptedTransport::always_ok().with_delay_ms(500)),
            ConnectivityGate::new(ConnectivityPolicy::AllowMetered, Arc::new(StaticConnectivity(false))),
            OrchestratorConfig { batch_size: 1, max_to_send: 0, max_concurrent_batches: 10 },
        );

        let timed_out = tokio::time::timeout(Duration::from_millis(50), orchestrator.run_session(dir.path())).await;
        assert!(timed_out.is_err());

        assert_eq!(orchestrator.status(), SessionStatus::Failed(FailureKind::Cancelled));
        let report = orchestrator.last_report().unwrap();
        assert_eq!(report.error_code.as_deref(), Some("CANCELLED"));
        assert_eq!((report.delivered, report.failed, report.pending), (0, 1, 1));
        assert_eq!(remaining(dir.path()).len(), 4);

        let report = orchestrator.run_session(dir.path()).await.unwrap();
        assert_eq!(report.status, SessionStatus::Success);
        assert_eq!(report.delivered, 2);
        assert!(remaining(dir.path()).is_empty());
    }
}
