//! Sealing of the plaintext queue into the ciphertext queue.
//!
//! Capture producers drop files into the plaintext directory. Each one is
//! sealed into an envelope named after the participant's short id, its
//! capture time, data kind and nonce, with the wrapped key written beside it.
//! The plaintext is removed only once both files are in place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::constants::PARTIAL_SUFFIX;
use crate::crypto::ArtifactEncryptor;
use crate::error::CryptoError;
use crate::models::{EnvelopeName, KeySidecar, PlaintextArtifact};

/// Counters for one pass over the plaintext queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SealReport {
    pub sealed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_in: u64,
    #[serde(skip)]
    pub envelopes: Vec<PathBuf>,
}

pub struct QueueSealer {
    encryptor: ArtifactEncryptor,
    short_id: String,
}

impl QueueSealer {
    pub fn new(encryptor: ArtifactEncryptor, short_id: impl Into<String>) -> Self {
        QueueSealer {
            encryptor,
            short_id: short_id.into(),
        }
    }

    /// Seal every regular file directly under `plain_dir` into `cipher_dir`.
    ///
    /// A failure on one artifact is logged and counted; its plaintext stays
    /// queued and the remaining artifacts are still processed.
    pub fn seal_pending(&self, plain_dir: &Path, cipher_dir: &Path) -> io::Result<SealReport> {
        let mut report = SealReport::default();
        if !plain_dir.exists() {
            debug!("Plaintext queue {} does not exist yet", plain_dir.display());
            return Ok(report);
        }
        fs::create_dir_all(cipher_dir)?;

        let walker = WalkDir::new(plain_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));

        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') || name.ends_with(PARTIAL_SUFFIX) {
                debug!("Skipping {} in plaintext queue", name);
                report.skipped += 1;
                continue;
            }

            let artifact = match PlaintextArtifact::from_path(entry.path()) {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!("Cannot stat {}: {}", entry.path().display(), e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.seal_artifact(&artifact, cipher_dir) {
                Ok(envelope) => {
                    report.sealed += 1;
                    report.bytes_in += artifact.size;
                    report.envelopes.push(envelope);
                }
                Err(e) => {
                    error!("Failed to seal {}: {}", artifact.path.display(), e);
                    report.failed += 1;
                }
            }
        }

        if report.sealed + report.failed > 0 {
            info!(
                "Sealed {} artifacts ({} bytes), {} failed, {} skipped",
                report.sealed, report.bytes_in, report.failed, report.skipped
            );
        }
        Ok(report)
    }

    /// Seal one artifact, returning the final envelope path.
    ///
    /// The envelope is written under a `.part` name and only renamed into the
    /// queue after its key sidecar exists, so the uploader never sees an
    /// envelope without its key.
    pub fn seal_artifact(&self, artifact: &PlaintextArtifact, cipher_dir: &Path) -> Result<PathBuf, CryptoError> {
        let nonce = ArtifactEncryptor::fresh_nonce()?;
        let name = EnvelopeName::new(
            &self.short_id,
            &artifact.created,
            artifact.data_kind(),
            &nonce,
            &artifact.extension(),
        );
        let envelope = cipher_dir.join(name.file_name());
        let partial = cipher_dir.join(format!("{}{}", name.file_name(), PARTIAL_SUFFIX));
        let sidecar_path = KeySidecar::path_for(&envelope);

        let sealed = self.encryptor.encrypt_to(&artifact.path, &partial, nonce)?;

        let sidecar = KeySidecar::new(sealed.wrapped_key_b64, sealed.nonce_b64, name.data_kind);
        if let Err(e) = sidecar.write(&sidecar_path) {
            discard(&partial);
            discard(&sidecar_path);
            return Err(CryptoError::io(&sidecar_path, e));
        }

        if let Err(e) = fs::rename(&partial, &envelope) {
            discard(&partial);
            discard(&sidecar_path);
            return Err(CryptoError::io(&envelope, e));
        }

        if let Err(e) = fs::remove_file(&artifact.path) {
            warn!("Sealed {} but could not remove plaintext: {}", artifact.path.display(), e);
        }
        debug!("{} -> {}", artifact.path.display(), envelope.display());
        Ok(envelope)
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}
