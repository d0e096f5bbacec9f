//! RSA key loading, generation and the OAEP key wrap.

use std::fs;
use std::path::Path;

use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};

use crate::error::CryptoError;

/// Parse an RSA public key from PEM.
///
/// Accepts SubjectPublicKeyInfo (`BEGIN PUBLIC KEY`) and PKCS#1
/// (`BEGIN RSA PUBLIC KEY`) encodings.
pub fn load_public_key_pem(pem: &[u8]) -> Result<PKey<Public>, CryptoError> {
    let key = match PKey::public_key_from_pem(pem) {
        Ok(key) => key,
        Err(_) => {
            let rsa = Rsa::public_key_from_pem_pkcs1(pem)
                .map_err(|e| CryptoError::InvalidKey(format!("not an RSA public key: {}", e)))?;
            PKey::from_rsa(rsa)?
        }
    };

    if key.id() != Id::RSA {
        return Err(CryptoError::InvalidKey("public key is not RSA".to_string()));
    }
    Ok(key)
}

/// Parse an RSA private key from PEM (PKCS#8 or traditional).
pub fn load_private_key_pem(pem: &[u8]) -> Result<PKey<Private>, CryptoError> {
    let key = PKey::private_key_from_pem(pem)
        .map_err(|e| CryptoError::InvalidKey(format!("not a private key: {}", e)))?;
    if key.id() != Id::RSA {
        return Err(CryptoError::InvalidKey("private key is not RSA".to_string()));
    }
    Ok(key)
}

pub fn load_public_key_file(path: &Path) -> Result<PKey<Public>, CryptoError> {
    let pem = fs::read(path).map_err(|e| CryptoError::io(path, e))?;
    load_public_key_pem(&pem)
}

pub fn load_private_key_file(path: &Path) -> Result<PKey<Private>, CryptoError> {
    let pem = fs::read(path).map_err(|e| CryptoError::io(path, e))?;
    load_private_key_pem(&pem)
}

pub fn generate_rsa_key(bits: u32) -> Result<PKey<Private>, CryptoError> {
    let rsa = Rsa::generate(bits)?;
    Ok(PKey::from_rsa(rsa)?)
}

/// PKCS#8 PEM encoding of a private key.
pub fn private_key_to_pem(key: &PKey<Private>) -> Result<Vec<u8>, CryptoError> {
    Ok(key.private_key_to_pem_pkcs8()?)
}

/// SubjectPublicKeyInfo PEM of the public half of a key.
pub fn public_key_pem(key: &PKey<Private>) -> Result<String, CryptoError> {
    let pem = key.public_key_to_pem()?;
    String::from_utf8(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Wrap a symmetric key with RSA-OAEP using SHA-256 for both the hash and MGF1.
pub fn wrap_key(public_key: &PKey<Public>, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut encrypter = Encrypter::new(public_key)?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
    encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

    let mut wrapped = vec![0u8; encrypter.encrypt_len(key)?];
    let len = encrypter.encrypt(key, &mut wrapped)?;
    wrapped.truncate(len);
    Ok(wrapped)
}

pub fn unwrap_key(private_key: &PKey<Private>, wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut decrypter = Decrypter::new(private_key)?;
    decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
    decrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

    let mut key = vec![0u8; decrypter.decrypt_len(wrapped)?];
    let len = decrypter.decrypt(wrapped, &mut key)?;
    key.truncate(len);
    Ok(key)
}
