//! # research-uplink
//!
//! Secure submission pipeline for research artifacts captured on a
//! participant's device.
//!
//! ## Overview
//!
//! Capture producers drop files into a plaintext queue. The uplink seals each
//! file with its own AES-256-GCM key, wraps that key under the study server's
//! RSA key, and moves the envelope into a ciphertext queue. Upload cycles
//! batch the envelopes into signed multipart requests, widen concurrency as
//! batches succeed, and delete an envelope only after the server answers
//! `201 Created`.
//!
//! ## Usage
//!
//! ### Sealing one artifact
//!
//! ```no_run
//! use research_uplink::crypto::ArtifactEncryptor;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let pem = std::fs::read("server_upload_key.pem")?;
//! let encryptor = ArtifactEncryptor::from_pem(&pem)?;
//!
//! let sealed = encryptor.seal(Path::new("/tmp/frame.png"), Path::new("/tmp/frame.png.enc"))?;
//! println!("{} bytes sealed, wrapped key {}", sealed.ciphertext_len, sealed.wrapped_key_b64);
//! # Ok(())
//! # }
//! ```
//!
//! ### Running a full cycle
//!
//! ```no_run
//! use research_uplink::config::load_or_create_config;
//! use research_uplink::identity::Identity;
//! use research_uplink::pipeline::Pipeline;
//! use research_uplink::trigger::UploadCycle;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = load_or_create_config(None)?;
//! let identity = Identity::load(&config.identity_path())?;
//! let pipeline = Pipeline::from_config(&config, &identity)?;
//!
//! let report = pipeline.run_cycle().await?;
//! println!("{:?}: {} delivered", report.status, report.delivered);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`crypto`]: envelope sealing and opening, RSA key handling
//! - [`signing`]: HTTP request signatures
//! - [`upload`]: batching, multipart transport and the upload orchestrator
//! - [`trigger`]: scheduling and the connectivity gate
//! - [`identity`]: enrollment and the persisted participant identity
//! - [`queue`]: sealing the plaintext queue
//! - [`config`]: YAML configuration

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Configuration file handling
pub mod config;

/// Application constants and default values
pub mod constants;

/// Authenticated encryption of artifacts
pub mod crypto;

/// Error types for each pipeline stage
pub mod error;

/// Enrollment and persisted participant identity
pub mod identity;

/// Core data models: data kinds, envelope names, key sidecars
pub mod models;

/// Seal-then-upload cycle wiring
pub mod pipeline;

/// Plaintext queue sealing
pub mod queue;

/// Credential scrubbing for log output
pub mod security;

/// HTTP request signing and verification
pub mod signing;

/// Upload scheduling and connectivity policy
pub mod trigger;

/// Batched envelope delivery
pub mod upload;

/// Hashing helpers
pub mod utils;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
