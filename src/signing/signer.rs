use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};
use regex::Regex;
use reqwest::Request;
use uuid::Uuid;

use crate::constants::{
    HEADER_REQUEST_ID, HEADER_SIGNATURE, PSS_SALT_LEN, SIGNED_HEADERS,
};
use crate::error::SigningError;
use crate::security::scrub_credentials;
use crate::signing::canonical::{
    body_digest, header_text, request_target, set_header, SignedFields,
};
use crate::signing::identity::SigningIdentity;

lazy_static! {
    static ref SIGNATURE_PARAM: Regex = Regex::new(r#"([A-Za-z]+)="([^"]*)""#).unwrap();
}

/// Signature scheme actually used for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaPssSha256,
    RsaSha256,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaPssSha256 => "rsa-pss-sha256",
            SignatureAlgorithm::RsaSha256 => "rsa-sha256",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa-pss-sha256" => Ok(SignatureAlgorithm::RsaPssSha256),
            "rsa-sha256" => Ok(SignatureAlgorithm::RsaSha256),
            other => Err(SigningError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Parsed `Signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub key_id: String,
    pub algorithm: SignatureAlgorithm,
    pub headers: String,
    pub signature: String,
}

impl SignatureHeader {
    pub fn to_header_value(&self) -> String {
        format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key_id, self.algorithm, self.headers, self.signature
        )
    }

    pub fn parse(value: &str) -> Result<Self, SigningError> {
        let params: HashMap<&str, &str> = SIGNATURE_PARAM
            .captures_iter(value)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();

        let field = |name: &str| -> Result<String, SigningError> {
            params
                .get(name)
                .map(|v| v.to_string())
                .ok_or_else(|| SigningError::MalformedSignature(format!("missing {}", name)))
        };

        Ok(SignatureHeader {
            key_id: field("keyId")?,
            algorithm: field("algorithm")?.parse()?,
            headers: field("headers")?,
            signature: field("signature")?,
        })
    }
}

/// Adds HTTP-signature authentication headers to outgoing requests.
///
/// Without an identity the signer passes requests through untouched, which
/// is the pre-enrollment state. With one, every request is signed or the
/// call fails; a request is never sent unsigned by accident.
#[derive(Clone, Default)]
pub struct RequestSigner {
    identity: Option<Arc<SigningIdentity>>,
}

impl RequestSigner {
    pub fn new(identity: SigningIdentity) -> Self {
        RequestSigner {
            identity: Some(Arc::new(identity)),
        }
    }

    pub fn unenrolled() -> Self {
        RequestSigner { identity: None }
    }

    pub fn is_enrolled(&self) -> bool {
        self.identity.is_some()
    }

    pub fn key_id(&self) -> Option<&str> {
        self.identity.as_deref().map(SigningIdentity::key_id)
    }

    /// Sign a request in place. Returns `None` for the unenrolled passthrough.
    pub fn sign(&self, request: &mut Request) -> Result<Option<SignatureHeader>, SigningError> {
        self.sign_at(request, Utc::now())
    }

    pub fn sign_at(
        &self,
        request: &mut Request,
        now: DateTime<Utc>,
    ) -> Result<Option<SignatureHeader>, SigningError> {
        let identity = match &self.identity {
            Some(identity) => identity,
            None => return Ok(None),
        };

        let body = body_bytes(request)?;
        let fields = SignedFields::resolve(request.headers(), body, &now)?;
        let request_id = match header_text(request.headers(), HEADER_REQUEST_ID)? {
            Some(id) => id,
            None => format!("rs-{}", Uuid::new_v4()),
        };

        let target = request_target(request.method(), request.url());
        let canonical = fields.canonical_string(&target);
        debug!("Canonical signing string:\n{}", canonical);

        let (algorithm, signature) = sign_canonical(identity, canonical.as_bytes())?;
        let header = SignatureHeader {
            key_id: identity.key_id().to_string(),
            algorithm,
            headers: SIGNED_HEADERS.to_string(),
            signature: BASE64.encode(signature),
        };

        let headers = request.headers_mut();
        fields.apply(headers)?;
        set_header(headers, HEADER_SIGNATURE, &header.to_header_value())?;
        set_header(headers, HEADER_REQUEST_ID, &request_id)?;

        debug!(
            "Signed {} with {}: {}",
            target,
            algorithm,
            scrub_credentials(&header.to_header_value())
        );
        Ok(Some(header))
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id())
            .finish()
    }
}

fn body_bytes(request: &Request) -> Result<&[u8], SigningError> {
    match request.body() {
        None => Ok(&[]),
        Some(body) => body.as_bytes().ok_or(SigningError::UnbufferedBody),
    }
}

fn sign_canonical(
    identity: &SigningIdentity,
    data: &[u8],
) -> Result<(SignatureAlgorithm, Vec<u8>), SigningError> {
    if identity.allows_pss() {
        match sign_pss(identity, data) {
            Ok(signature) => return Ok((SignatureAlgorithm::RsaPssSha256, signature)),
            Err(e) => warn!("RSA-PSS signing rejected, falling back to PKCS#1 v1.5: {}", e),
        }
    }

    let mut signer = Signer::new(MessageDigest::sha256(), identity.private_key())?;
    signer.set_rsa_padding(Padding::PKCS1)?;
    signer.update(data)?;
    Ok((SignatureAlgorithm::RsaSha256, signer.sign_to_vec()?))
}

fn sign_pss(identity: &SigningIdentity, data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut signer = Signer::new(MessageDigest::sha256(), identity.private_key())?;
    signer.set_rsa_padding(Padding::PKCS1_PSS)?;
    signer.set_rsa_pss_saltlen(RsaPssSaltlen::custom(PSS_SALT_LEN))?;
    signer.set_rsa_mgf1_md(MessageDigest::sha256())?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

/// Check a signed request against the signer's public key.
///
/// Recomputes the canonical string from the request's own headers, checks
/// the digest against the buffered body, then verifies the signature under
/// the advertised algorithm.
pub fn verify(request: &Request, public_key: &PKey<Public>) -> Result<SignatureHeader, SigningError> {
    let value = header_text(request.headers(), HEADER_SIGNATURE)?
        .ok_or(SigningError::MissingHeader(HEADER_SIGNATURE))?;
    let header = SignatureHeader::parse(&value)?;
    if header.headers != SIGNED_HEADERS {
        return Err(SigningError::MalformedSignature(format!(
            "unexpected signed header list: {}",
            header.headers
        )));
    }

    let fields = SignedFields::from_headers(request.headers())?;
    if fields.digest != body_digest(body_bytes(request)?) {
        return Err(SigningError::DigestMismatch);
    }

    let canonical = fields.canonical_string(&request_target(request.method(), request.url()));
    let signature = BASE64
        .decode(&header.signature)
        .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;

    let mut verifier = Verifier::new(MessageDigest::sha256(), public_key)?;
    match header.algorithm {
        SignatureAlgorithm::RsaPssSha256 => {
            verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
            verifier.set_rsa_pss_saltlen(RsaPssSaltlen::custom(PSS_SALT_LEN))?;
            verifier.set_rsa_mgf1_md(MessageDigest::sha256())?;
        }
        SignatureAlgorithm::RsaSha256 => verifier.set_rsa_padding(Padding::PKCS1)?,
    }
    verifier.update(canonical.as_bytes())?;

    if verifier.verify(&signature)? {
        Ok(header)
    } else {
        Err(SigningError::InvalidSignature)
    }
}
