use std::fmt;
use std::path::Path;

use openssl::pkey::{PKey, Private, Public};

use crate::crypto::{load_private_key_file, load_private_key_pem};
use crate::error::SigningError;

/// Key material a [`RequestSigner`](super::RequestSigner) signs with.
///
/// `key_id` is the participant id the server uses to look up the public key.
pub struct SigningIdentity {
    key_id: String,
    private_key: PKey<Private>,
    allow_pss: bool,
}

impl SigningIdentity {
    pub fn new(key_id: impl Into<String>, private_key: PKey<Private>) -> Self {
        SigningIdentity {
            key_id: key_id.into(),
            private_key,
            allow_pss: true,
        }
    }

    pub fn from_pem(key_id: impl Into<String>, pem: &[u8]) -> Result<Self, SigningError> {
        let key = load_private_key_pem(pem).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key_id, key))
    }

    pub fn from_key_file(key_id: impl Into<String>, path: &Path) -> Result<Self, SigningError> {
        let key = load_private_key_file(path).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key_id, key))
    }

    /// Restrict signing to PKCS#1 v1.5 for keys whose provider refuses PSS.
    pub fn with_pss(mut self, allow: bool) -> Self {
        self.allow_pss = allow;
        self
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn allows_pss(&self) -> bool {
        self.allow_pss
    }

    pub(crate) fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn public_key(&self) -> Result<PKey<Public>, SigningError> {
        let pem = self.private_key.public_key_to_pem()?;
        Ok(PKey::public_key_from_pem(&pem)?)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("key_id", &self.key_id)
            .field("private_key", &"<redacted>")
            .field("allow_pss", &self.allow_pss)
            .finish()
    }
}
