use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use openssl::pkey::{PKey, Private, Public};
use openssl::rand::rand_bytes;
use openssl::symm::{Cipher, Crypter, Mode};

use crate::constants::{
    NONCE_LEN, PARTIAL_SUFFIX, STREAMING_BUFFER_SIZE, SYMMETRIC_KEY_LEN, TAG_LEN,
};
use crate::crypto::keys::{load_public_key_pem, unwrap_key, wrap_key};
use crate::error::CryptoError;

/// Result of sealing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub envelope_path: PathBuf,
    pub wrapped_key_b64: String,
    pub nonce_b64: String,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext_len: u64,
}

/// Seals artifacts as `[nonce] ‖ [AES-256-GCM ciphertext ‖ tag]` with a
/// one-time key wrapped under the server's RSA public key.
///
/// Every call draws a fresh key and nonce; nothing is cached between
/// artifacts.
pub struct ArtifactEncryptor {
    server_key: PKey<Public>,
}

impl ArtifactEncryptor {
    pub fn new(server_key: PKey<Public>) -> Self {
        ArtifactEncryptor { server_key }
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self::new(load_public_key_pem(pem)?))
    }

    /// 96 random bits from the OpenSSL CSPRNG.
    pub fn fresh_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand_bytes(&mut nonce)?;
        Ok(nonce)
    }

    /// Seal `plaintext` into `output` and delete the plaintext on success.
    ///
    /// On failure the plaintext is left untouched and no output remains.
    pub fn seal(&self, plaintext: &Path, output: &Path) -> Result<SealedEnvelope, CryptoError> {
        let nonce = Self::fresh_nonce()?;
        let sealed = self.encrypt_to(plaintext, output, nonce)?;

        if let Err(e) = fs::remove_file(plaintext) {
            warn!("Sealed {} but could not remove plaintext: {}", plaintext.display(), e);
        }
        Ok(sealed)
    }

    /// Encrypt `plaintext` into a new file at `output` using `nonce`, leaving
    /// the source in place.
    ///
    /// `nonce` must come from [`ArtifactEncryptor::fresh_nonce`]; it is only a
    /// parameter so callers can embed it in the output name first. `output`
    /// must not exist.
    pub fn encrypt_to(
        &self,
        plaintext: &Path,
        output: &Path,
        nonce: [u8; NONCE_LEN],
    ) -> Result<SealedEnvelope, CryptoError> {
        let mut key = [0u8; SYMMETRIC_KEY_LEN];
        rand_bytes(&mut key)?;

        // Wrap first so a bad server key never leaves an orphaned envelope.
        let wrapped = wrap_key(&self.server_key, &key)?;

        let input = File::open(plaintext).map_err(|e| CryptoError::io(plaintext, e))?;
        let out_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(output)
            .map_err(|e| CryptoError::io(output, e))?;

        let result = stream_encrypt(&key, &nonce, BufReader::new(input), out_file, output);
        key.fill(0);

        match result {
            Ok(ciphertext_len) => {
                debug!("Sealed {} -> {} ({} bytes)", plaintext.display(), output.display(), ciphertext_len);
                Ok(SealedEnvelope {
                    envelope_path: output.to_path_buf(),
                    wrapped_key_b64: BASE64.encode(&wrapped),
                    nonce_b64: BASE64.encode(nonce),
                    nonce,
                    ciphertext_len,
                })
            }
            Err(e) => {
                remove_partial(output);
                Err(e)
            }
        }
    }
}

fn stream_encrypt<R: Read>(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    mut reader: R,
    out_file: File,
    output: &Path,
) -> Result<u64, CryptoError> {
    let cipher = Cipher::aes_256_gcm();
    let mut crypter = Crypter::new(cipher, Mode::Encrypt, key, Some(nonce))?;
    let mut writer = BufWriter::new(out_file);

    let mut buffer = vec![0u8; STREAMING_BUFFER_SIZE];
    let mut encrypted = vec![0u8; STREAMING_BUFFER_SIZE + cipher.block_size()];
    let mut written = 0u64;

    writer.write_all(nonce).map_err(|e| CryptoError::io(output, e))?;

    loop {
        let read = reader.read(&mut buffer).map_err(|e| CryptoError::io(output, e))?;
        if read == 0 {
            break;
        }
        let count = crypter.update(&buffer[..read], &mut encrypted)?;
        writer.write_all(&encrypted[..count]).map_err(|e| CryptoError::io(output, e))?;
        written += count as u64;
    }

    let count = crypter.finalize(&mut encrypted)?;
    writer.write_all(&encrypted[..count]).map_err(|e| CryptoError::io(output, e))?;
    written += count as u64;

    let mut tag = [0u8; TAG_LEN];
    crypter.get_tag(&mut tag)?;
    writer.write_all(&tag).map_err(|e| CryptoError::io(output, e))?;
    written += TAG_LEN as u64;

    let file = writer
        .into_inner()
        .map_err(|e| CryptoError::io(output, e.into_error()))?;
    file.sync_all().map_err(|e| CryptoError::io(output, e))?;

    Ok(written)
}

/// Decrypt an envelope into `writer`, returning the plaintext length.
///
/// Plaintext is streamed before the tag is checked, so callers writing to
/// disk must discard the output on error; [`open_to_path`] does that.
pub fn open_to_writer<W: Write>(
    envelope: &Path,
    wrapped_key_b64: &str,
    private_key: &PKey<Private>,
    writer: &mut W,
) -> Result<u64, CryptoError> {
    let wrapped = BASE64.decode(wrapped_key_b64.trim())?;
    let mut key = unwrap_key(private_key, &wrapped)?;
    if key.len() != SYMMETRIC_KEY_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "unwrapped key is {} bytes, expected {}",
            key.len(),
            SYMMETRIC_KEY_LEN
        )));
    }

    let file = File::open(envelope).map_err(|e| CryptoError::io(envelope, e))?;
    let total = file.metadata().map_err(|e| CryptoError::io(envelope, e))?.len();
    let overhead = (NONCE_LEN + TAG_LEN) as u64;
    if total < overhead {
        return Err(CryptoError::MalformedEnvelope {
            path: envelope.to_path_buf(),
            reason: format!("{} bytes is shorter than nonce and tag", total),
        });
    }

    let mut reader = BufReader::new(file);
    let mut nonce = [0u8; NONCE_LEN];
    reader.read_exact(&mut nonce).map_err(|e| CryptoError::io(envelope, e))?;

    let cipher = Cipher::aes_256_gcm();
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, &key, Some(&nonce))?;
    key.fill(0);

    let mut remaining = total - overhead;
    let mut buffer = vec![0u8; STREAMING_BUFFER_SIZE];
    let mut decrypted = vec![0u8; STREAMING_BUFFER_SIZE + cipher.block_size()];
    let mut written = 0u64;

    while remaining > 0 {
        let want = remaining.min(STREAMING_BUFFER_SIZE as u64) as usize;
        reader
            .read_exact(&mut buffer[..want])
            .map_err(|e| CryptoError::io(envelope, e))?;
        let count = crypter.update(&buffer[..want], &mut decrypted)?;
        writer
            .write_all(&decrypted[..count])
            .map_err(|e| CryptoError::io(envelope, e))?;
        written += count as u64;
        remaining -= want as u64;
    }

    let mut tag = [0u8; TAG_LEN];
    reader.read_exact(&mut tag).map_err(|e| CryptoError::io(envelope, e))?;
    crypter.set_tag(&tag)?;

    let count = crypter
        .finalize(&mut decrypted)
        .map_err(|_| CryptoError::Authentication(envelope.to_path_buf()))?;
    writer
        .write_all(&decrypted[..count])
        .map_err(|e| CryptoError::io(envelope, e))?;
    written += count as u64;

    Ok(written)
}

/// Decrypt an envelope fully into memory.
pub fn open(
    envelope: &Path,
    wrapped_key_b64: &str,
    private_key: &PKey<Private>,
) -> Result<Vec<u8>, CryptoError> {
    let mut plaintext = Vec::new();
    open_to_writer(envelope, wrapped_key_b64, private_key, &mut plaintext)?;
    Ok(plaintext)
}

/// Decrypt an envelope into `output`; nothing is left behind on failure.
pub fn open_to_path(
    envelope: &Path,
    wrapped_key_b64: &str,
    private_key: &PKey<Private>,
    output: &Path,
) -> Result<u64, CryptoError> {
    let mut partial_name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    partial_name.push(PARTIAL_SUFFIX);
    let partial = output.with_file_name(partial_name);

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&partial)
        .map_err(|e| CryptoError::io(&partial, e))?;
    let mut writer = BufWriter::new(file);

    let result = open_to_writer(envelope, wrapped_key_b64, private_key, &mut writer)
        .and_then(|len| {
            writer.flush().map_err(|e| CryptoError::io(&partial, e))?;
            Ok(len)
        });
    drop(writer);

    match result {
        Ok(len) => {
            fs::rename(&partial, output).map_err(|e| CryptoError::io(output, e))?;
            Ok(len)
        }
        Err(e) => {
            remove_partial(&partial);
            Err(e)
        }
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}
