//! Batched delivery of sealed envelopes.
//!
//! ## Flow
//!
//! 1. [`BatchBuilder`] snapshots the ciphertext queue and splits it into
//!    batches of at most `batch_size`, stopping at the per-cycle cap.
//! 2. [`UploadOrchestrator`] runs the batches through a [`BatchTransport`],
//!    starting with one in flight and allowing one more per delivered batch.
//! 3. Envelopes of a batch acknowledged with HTTP 201 are deleted with their
//!    key sidecars; everything else stays queued for the next cycle.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use research_uplink::signing::RequestSigner;
//! use research_uplink::trigger::{default_probe, ConnectivityGate, ConnectivityPolicy};
//! use research_uplink::upload::{HttpBatchTransport, OrchestratorConfig, UploadOrchestrator, UploadTarget};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let target = UploadTarget {
//!     base_url: "https://research.example.org".into(),
//!     study_id: "study-1".into(),
//!     participant_id: "ppt-1".into(),
//!     bearer_token: None,
//! };
//! let transport = HttpBatchTransport::new(target, RequestSigner::unenrolled(), Duration::from_secs(1200))?;
//! let orchestrator = UploadOrchestrator::new(
//!     Arc::new(transport),
//!     ConnectivityGate::new(ConnectivityPolicy::WifiOnly, default_probe()),
//!     OrchestratorConfig::default(),
//! );
//!
//! let report = orchestrator.run_session(Path::new("/var/lib/research-uplink/encrypt")).await?;
//! println!("{} delivered, {} failed", report.delivered, report.failed);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod multipart;
pub mod orchestrator;
pub mod session;
pub mod transport;

pub use batch::{Batch, BatchBuilder, Envelope, QueueScan, SkipReason};
pub use multipart::{encode_batch, MultipartBody};
pub use orchestrator::{OrchestratorConfig, UploadOrchestrator};
pub use session::{FailureKind, SessionReport, SessionStatus, UploadSession};
pub use transport::{BatchTransport, DeliveryReceipt, HttpBatchTransport, UploadTarget};
