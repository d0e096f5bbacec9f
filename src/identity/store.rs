use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use openssl::pkey::{PKey, Private};
use serde::{Deserialize, Serialize};

use crate::constants::{IDENTITY_KEY_BITS, SHORT_ID_LEN};
use crate::crypto::{generate_rsa_key, load_private_key_file, private_key_to_pem, ArtifactEncryptor};
use crate::signing::SigningIdentity;
use crate::upload::UploadTarget;
use crate::utils::hash::sha256_hex;

/// Persisted result of enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: String,
    pub study_id: String,
    pub short_id: String,
    pub upload_public_key_pem: String,
    pub identity_key_path: PathBuf,
    pub base_url: String,
    /// Bearer token from a token enrollment, sent with uploads when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_token: Option<String>,
    pub enrolled_at: DateTime<Utc>,
}

impl Identity {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read identity file: {}", path.display()))?;
        serde_json::from_str(&content)
            .context(format!("Failed to parse identity file: {}", path.display()))
    }

    /// Write the identity as JSON, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize identity")?;
        write_private(path, &json)
            .context(format!("Failed to write identity file: {}", path.display()))?;
        info!("Saved identity for participant {} to {}", self.participant_id, path.display());
        Ok(())
    }

    pub fn signing_identity(&self) -> Result<SigningIdentity> {
        SigningIdentity::from_key_file(self.participant_id.clone(), &self.identity_key_path)
            .context(format!("Failed to load identity key {}", self.identity_key_path.display()))
    }

    pub fn encryptor(&self) -> Result<ArtifactEncryptor> {
        ArtifactEncryptor::from_pem(self.upload_public_key_pem.as_bytes())
            .context("Server upload key in identity file is not a usable RSA public key")
    }

    pub fn upload_target(&self) -> UploadTarget {
        UploadTarget {
            base_url: self.base_url.clone(),
            study_id: self.study_id.clone(),
            participant_id: self.participant_id.clone(),
            bearer_token: self.upload_token.clone(),
        }
    }
}

/// First eight hex characters of SHA-256 over the enrollment secret.
///
/// Hex secrets (as printed on enrollment QR codes) are hashed as the bytes
/// they encode, anything else as its UTF-8 text.
pub fn short_id_for(secret: &str) -> String {
    let secret = secret.trim();
    let digest = match hex::decode(secret) {
        Ok(bytes) if !bytes.is_empty() => sha256_hex(&bytes),
        _ => sha256_hex(secret.as_bytes()),
    };
    digest[..SHORT_ID_LEN].to_string()
}

/// Load the identity key at `path`, generating and saving a new RSA key if
/// there is none yet.
pub fn load_or_create_identity_key(path: &Path) -> Result<PKey<Private>> {
    if path.exists() {
        return load_private_key_file(path)
            .context(format!("Failed to load identity key {}", path.display()));
    }

    info!("Generating {}-bit identity key at {}", IDENTITY_KEY_BITS, path.display());
    let key = generate_rsa_key(IDENTITY_KEY_BITS).context("Failed to generate identity key")?;
    let pem = private_key_to_pem(&key).context("Failed to encode identity key")?;
    write_private(path, &pem).context(format!("Failed to write identity key {}", path.display()))?;
    Ok(key)
}

/// Write a file with owner-only permissions via a temporary sibling.
///
/// The sibling is created with mode 0600, so the bytes are never readable
/// by other users.
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    // Leftover from an interrupted write
    match fs::remove_file(&tmp) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
}
