use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::constants::DEFAULT_TRIGGER_INTERVAL_SECS;
use crate::error::UploadError;
use crate::trigger::connectivity::ConnectivityGate;
use crate::upload::SessionReport;

/// One seal-and-upload pass, as run by the trigger.
#[async_trait]
pub trait UploadCycle: Send + Sync {
    async fn run_cycle(&self) -> Result<SessionReport, UploadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Startup,
    Scheduled,
    OnDemand,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerReason::Startup => "startup",
            TriggerReason::Scheduled => "scheduled",
            TriggerReason::OnDemand => "on-demand",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerCommand {
    UploadNow,
    Shutdown,
}

/// Cloneable handle for asking a running [`UploadTrigger`] to act.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    commands: mpsc::Sender<TriggerCommand>,
}

impl TriggerHandle {
    /// Request an immediate cycle. Returns `false` if the trigger has stopped.
    pub async fn upload_now(&self) -> bool {
        self.commands.send(TriggerCommand::UploadNow).await.is_ok()
    }

    pub async fn shutdown(&self) -> bool {
        self.commands.send(TriggerCommand::Shutdown).await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    pub interval: Duration,
    pub run_on_start: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig {
            interval: Duration::from_secs(DEFAULT_TRIGGER_INTERVAL_SECS),
            run_on_start: false,
        }
    }
}

/// Counters returned when the trigger stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerStats {
    pub cycles_run: usize,
    pub cycles_skipped: usize,
    pub last_report: Option<SessionReport>,
}

/// Schedules upload cycles on a fixed cadence and on request.
///
/// Each firing first consults the connectivity gate; when it refuses, the
/// cycle is skipped with a log line and the schedule continues.
pub struct UploadTrigger {
    cycle: Arc<dyn UploadCycle>,
    gate: ConnectivityGate,
    config: TriggerConfig,
    commands: mpsc::Receiver<TriggerCommand>,
    stats: TriggerStats,
}

impl UploadTrigger {
    pub fn new(cycle: Arc<dyn UploadCycle>, gate: ConnectivityGate, config: TriggerConfig) -> (Self, TriggerHandle) {
        let (tx, rx) = mpsc::channel(8);
        let trigger = UploadTrigger {
            cycle,
            gate,
            config,
            commands: rx,
            stats: TriggerStats::default(),
        };
        (trigger, TriggerHandle { commands: tx })
    }

    /// Run until shut down or every handle is dropped.
    ///
    /// The first scheduled firing happens one interval after start; with
    /// `run_on_start` a cycle also runs immediately.
    pub async fn run(mut self) -> TriggerStats {
        let period = self.config.interval.max(Duration::from_secs(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Upload trigger running every {:?}", period);

        if self.config.run_on_start {
            self.fire(TriggerReason::Startup).await;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => self.fire(TriggerReason::Scheduled).await,
                command = self.commands.recv() => match command {
                    Some(TriggerCommand::UploadNow) => self.fire(TriggerReason::OnDemand).await,
                    Some(TriggerCommand::Shutdown) | None => break,
                },
            }
        }

        info!(
            "Upload trigger stopped after {} cycles ({} skipped)",
            self.stats.cycles_run, self.stats.cycles_skipped
        );
        self.stats
    }

    async fn fire(&mut self, reason: TriggerReason) {
        if !self.gate.permits_now().await {
            info!("Skipping {} upload: no unmetered connection and metered uploads disabled", reason);
            self.stats.cycles_skipped += 1;
            return;
        }

        debug!("Starting {} upload cycle", reason);
        match self.cycle.run_cycle().await {
            Ok(report) => {
                self.stats.cycles_run += 1;
                info!(
                    "{} upload cycle finished: {:?}, {} delivered, {} failed",
                    reason, report.status, report.delivered, report.failed
                );
                self.stats.last_report = Some(report);
            }
            Err(UploadError::AlreadySending) => {
                info!("Skipping {} upload: a session is already sending", reason);
                self.stats.cycles_skipped += 1;
            }
            Err(e) => {
                self.stats.cycles_run += 1;
                warn!("{} upload cycle failed: {}", reason, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::connectivity::{ConnectivityPolicy, MockConnectivityProbe, StaticConnectivity};
    use crate::upload::UploadSession;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCycle {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl UploadCycle for CountingCycle {
        async fn run_cycle(&self) -> Result<SessionReport, UploadError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut session = UploadSession::new(1);
            session.begin(0, 0, 0, 0)?;
            Ok(session.finalize())
        }
    }

    fn gate(wifi: bool, policy: ConnectivityPolicy) -> ConnectivityGate {
        ConnectivityGate::new(policy, Arc::new(StaticConnectivity(wifi)))
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_cycles_follow_interval() {
        let cycle = Arc::new(CountingCycle::default());
        let (trigger, handle) = UploadTrigger::new(
            cycle.clone(),
            gate(true, ConnectivityPolicy::WifiOnly),
            TriggerConfig { interval: 12 * HOUR, run_on_start: false },
        );
        let task = tokio::spawn(trigger.run());

        tokio::time::sleep(11 * HOUR).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(2 * HOUR).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(12 * HOUR).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 2);

        assert!(handle.shutdown().await);
        let stats = task.await.unwrap();
        assert_eq!(stats.cycles_run, 2);
        assert_eq!(stats.cycles_skipped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_start_and_on_demand() {
        let cycle = Arc::new(CountingCycle::default());
        let (trigger, handle) = UploadTrigger::new(
            cycle.clone(),
            gate(true, ConnectivityPolicy::WifiOnly),
            TriggerConfig { interval: 12 * HOUR, run_on_start: true },
        );
        let task = tokio::spawn(trigger.run());

        assert!(handle.upload_now().await);
        assert!(handle.upload_now().await);
        assert!(handle.shutdown().await);

        let stats = task.await.unwrap();
        assert_eq!(stats.cycles_run, 3);
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);
        assert!(stats.last_report.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wifi_skips_when_wifi_only() {
        let cycle = Arc::new(CountingCycle::default());
        let (trigger, handle) = UploadTrigger::new(
            cycle.clone(),
            gate(false, ConnectivityPolicy::WifiOnly),
            TriggerConfig { interval: HOUR, run_on_start: true },
        );
        let task = tokio::spawn(trigger.run());

        handle.upload_now().await;
        handle.shutdown().await;

        let stats = task.await.unwrap();
        assert_eq!(stats.cycles_run, 0);
        assert_eq!(stats.cycles_skipped, 2);
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wifi_runs_when_metered_allowed() {
        let cycle = Arc::new(CountingCycle::default());
        let mut probe = MockConnectivityProbe::new();
        probe.expect_has_unmetered_transport().never();
        let (trigger, handle) = UploadTrigger::new(
            cycle.clone(),
            ConnectivityGate::new(ConnectivityPolicy::AllowMetered, Arc::new(probe)),
            TriggerConfig { interval: HOUR, run_on_start: true },
        );
        let task = tokio::spawn(trigger.run());

        handle.shutdown().await;
        assert_eq!(task.await.unwrap().cycles_run, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_stops_trigger() {
        let (trigger, handle) = UploadTrigger::new(
            Arc::new(CountingCycle::default()),
            gate(true, ConnectivityPolicy::WifiOnly),
            TriggerConfig::default(),
        );
        let task = tokio::spawn(trigger.run());
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats.cycles_run, 0);
    }
}
