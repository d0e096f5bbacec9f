//! Test utilities for research-uplink
//!
//! Shared keys, queue fixtures and a scripted transport for unit tests.

#![cfg(test)]

/// One RSA key pair per test process; generating keys per test is slow.
pub mod keys {
    use lazy_static::lazy_static;
    use openssl::pkey::{PKey, Private, Public};

    use crate::crypto::{generate_rsa_key, public_key_pem, ArtifactEncryptor};
    use crate::signing::SigningIdentity;

    lazy_static! {
        static ref TEST_KEY: PKey<Private> = generate_rsa_key(2048).unwrap();
    }

    pub fn test_private_key() -> &'static PKey<Private> {
        &TEST_KEY
    }

    pub fn test_public_key_pem() -> String {
        public_key_pem(&TEST_KEY).unwrap()
    }

    pub fn test_public_key() -> PKey<Public> {
        PKey::public_key_from_pem(test_public_key_pem().as_bytes()).unwrap()
    }

    pub fn test_encryptor() -> ArtifactEncryptor {
        ArtifactEncryptor::new(test_public_key())
    }

    pub fn test_identity(key_id: &str) -> SigningIdentity {
        SigningIdentity::new(key_id, TEST_KEY.clone())
    }
}

/// Ciphertext queue entries with well-formed names.
pub mod fixtures {
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::models::{DataKind, KeySidecar};

    /// Envelope name for index `i`; names sort in index order.
    pub fn envelope_name(i: usize) -> String {
        format!("1a2b3c4d_2025-09-29T120812-0500_image_{:024x}.png", i)
    }

    /// Write a dummy envelope (and optionally its sidecar) into `dir`.
    pub fn write_envelope(dir: &Path, i: usize, with_sidecar: bool) -> PathBuf {
        let path = dir.join(envelope_name(i));
        fs::write(&path, format!("ciphertext-{}", i)).unwrap();
        if with_sidecar {
            let sidecar = KeySidecar::new(format!("wrapped-{}", i), format!("nonce-{}", i), DataKind::Image);
            sidecar.write(&KeySidecar::path_for(&path)).unwrap();
        }
        path
    }
}

/// A [`BatchTransport`](crate::upload::BatchTransport) with canned outcomes.
pub mod transport {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::constants::HTTP_CREATED;
    use crate::error::UploadError;
    use crate::upload::{Batch, BatchTransport, DeliveryReceipt};

    #[derive(Default)]
    pub struct ScriptedTransport {
        failures: HashMap<usize, u16>,
        panics: HashSet<usize>,
        delay: Option<Duration>,
        submitted: Mutex<Vec<usize>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn always_ok() -> Self {
            Self::default()
        }

        /// Answer `status` for the listed batch indexes, 201 for the rest.
        pub fn failing_batches(indexes: &[usize], status: u16) -> Self {
            ScriptedTransport {
                failures: indexes.iter().map(|&i| (i, status)).collect(),
                ..Self::default()
            }
        }

        pub fn panicking_batches(indexes: &[usize]) -> Self {
            ScriptedTransport {
                panics: indexes.iter().copied().collect(),
                ..Self::default()
            }
        }

        pub fn with_delay_ms(mut self, ms: u64) -> Self {
            self.delay = Some(Duration::from_millis(ms));
            self
        }

        /// Batch indexes in submission order.
        pub fn submitted(&self) -> Vec<usize> {
            self.submitted.lock().unwrap().clone()
        }

        /// Highest number of submits observed running at once.
        pub fn max_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchTransport for ScriptedTransport {
        async fn submit(&self, batch: &Batch) -> Result<DeliveryReceipt, UploadError> {
            self.submitted.lock().unwrap().push(batch.index);
            if self.panics.contains(&batch.index) {
                panic!("scripted panic in batch {}", batch.index);
            }

            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            match self.failures.get(&batch.index) {
                Some(&status) => Err(UploadError::Server {
                    status,
                    body: format!("{{\"error\":\"scripted {}\"}}", status),
                }),
                None => Ok(DeliveryReceipt {
                    status: HTTP_CREATED,
                    body: "{}".to_string(),
                }),
            }
        }
    }
}
