//! One full cycle: seal what the producers queued, then upload the
//! ciphertext queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};

use crate::config::UplinkConfig;
use crate::error::UploadError;
use crate::identity::Identity;
use crate::queue::{QueueSealer, SealReport};
use crate::signing::RequestSigner;
use crate::trigger::{default_probe, ConnectivityGate, UploadCycle};
use crate::upload::{HttpBatchTransport, SessionReport, UploadOrchestrator};

pub struct Pipeline {
    sealer: Arc<QueueSealer>,
    orchestrator: UploadOrchestrator,
    plaintext_dir: PathBuf,
    ciphertext_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        sealer: QueueSealer,
        orchestrator: UploadOrchestrator,
        plaintext_dir: PathBuf,
        ciphertext_dir: PathBuf,
    ) -> Self {
        Pipeline {
            sealer: Arc::new(sealer),
            orchestrator,
            plaintext_dir,
            ciphertext_dir,
        }
    }

    /// Wire the production collaborators for an enrolled participant.
    pub fn from_config(config: &UplinkConfig, identity: &Identity) -> Result<Self> {
        let sealer = QueueSealer::new(identity.encryptor()?, identity.short_id.clone());
        let signer = RequestSigner::new(identity.signing_identity()?);
        let transport = HttpBatchTransport::new(identity.upload_target(), signer, config.request_timeout())
            .context("Failed to build HTTP client")?;
        let gate = ConnectivityGate::new(config.upload.connectivity, default_probe());
        let orchestrator = UploadOrchestrator::new(Arc::new(transport), gate, config.orchestrator_config());

        Ok(Self::new(
            sealer,
            orchestrator,
            config.plaintext_dir(),
            config.ciphertext_dir(),
        ))
    }

    pub fn orchestrator(&self) -> &UploadOrchestrator {
        &self.orchestrator
    }

    /// Seal the plaintext queue on the blocking pool.
    pub async fn seal(&self) -> Result<SealReport, UploadError> {
        let sealer = Arc::clone(&self.sealer);
        let plain = self.plaintext_dir.clone();
        let cipher = self.ciphertext_dir.clone();

        tokio::task::spawn_blocking(move || sealer.seal_pending(&plain, &cipher))
            .await
            .map_err(|e| UploadError::Aborted(format!("sealing task: {}", e)))?
            .map_err(UploadError::from)
    }
}

#[async_trait]
impl UploadCycle for Pipeline {
    async fn run_cycle(&self) -> Result<SessionReport, UploadError> {
        // Envelopes sealed in earlier cycles still deserve an upload attempt.
        match self.seal().await {
            Ok(report) if report.failed > 0 => {
                warn!("{} artifacts could not be sealed and stay queued", report.failed)
            }
            Ok(_) => {}
            Err(e) => warn!("Sealing pass failed: {}", e),
        }

        let report = self.orchestrator.run_session(&self.ciphertext_dir).await?;
        info!(
            "Cycle complete: {:?}, {}/{} delivered",
            report.status, report.delivered, report.queued
        );
        Ok(report)
    }
}
