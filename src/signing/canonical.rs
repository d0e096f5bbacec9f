//! Canonical signing string for HTTP request signatures.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{
    HEADER_DATE, HEADER_DIGEST, HEADER_REQUEST_NONCE, HEADER_REQUEST_TIMESTAMP, HTTP_DATE_FORMAT,
    REQUEST_TIMESTAMP_FORMAT,
};
use crate::error::SigningError;

/// `<lower-method> <path>[?<query>]`
pub fn request_target(method: &Method, url: &Url) -> String {
    let mut target = format!("{} {}", method.as_str().to_ascii_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// `SHA-256=<base64 digest>` of a request body.
pub fn body_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(Sha256::digest(body)))
}

pub fn http_date(now: &DateTime<Utc>) -> String {
    now.format(HTTP_DATE_FORMAT).to_string()
}

pub fn request_timestamp(now: &DateTime<Utc>) -> String {
    now.format(REQUEST_TIMESTAMP_FORMAT).to_string()
}

/// Non-empty header value as a string; `Ok(None)` when absent or blank.
pub fn header_text(headers: &HeaderMap, name: &'static str) -> Result<Option<String>, SigningError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let text = value.to_str().map_err(|_| SigningError::InvalidHeader(name))?;
            if text.is_empty() {
                Ok(None)
            } else {
                Ok(Some(text.to_string()))
            }
        }
    }
}

pub fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), SigningError> {
    let value = HeaderValue::from_str(value).map_err(|_| SigningError::InvalidHeader(name))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// The signed header values of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedFields {
    pub date: String,
    pub digest: String,
    pub nonce: String,
    pub timestamp: String,
}

impl SignedFields {
    /// Reuse values already on the request, generating only what is missing.
    ///
    /// Reuse is what keeps re-signing a signed request idempotent.
    pub fn resolve(headers: &HeaderMap, body: &[u8], now: &DateTime<Utc>) -> Result<Self, SigningError> {
        Ok(SignedFields {
            date: header_text(headers, HEADER_DATE)?.unwrap_or_else(|| http_date(now)),
            digest: header_text(headers, HEADER_DIGEST)?.unwrap_or_else(|| body_digest(body)),
            nonce: header_text(headers, HEADER_REQUEST_NONCE)?
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: header_text(headers, HEADER_REQUEST_TIMESTAMP)?
                .unwrap_or_else(|| request_timestamp(now)),
        })
    }

    /// Read the values a signer left on the request; all must be present.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, SigningError> {
        let require = |name: &'static str| -> Result<String, SigningError> {
            header_text(headers, name)?.ok_or(SigningError::MissingHeader(name))
        };

        Ok(SignedFields {
            date: require(HEADER_DATE)?,
            digest: require(HEADER_DIGEST)?,
            nonce: require(HEADER_REQUEST_NONCE)?,
            timestamp: require(HEADER_REQUEST_TIMESTAMP)?,
        })
    }

    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), SigningError> {
        set_header(headers, HEADER_DATE, &self.date)?;
        set_header(headers, HEADER_DIGEST, &self.digest)?;
        set_header(headers, HEADER_REQUEST_NONCE, &self.nonce)?;
        set_header(headers, HEADER_REQUEST_TIMESTAMP, &self.timestamp)?;
        Ok(())
    }

    /// Newline-joined canonical string, in the order the `headers` field lists.
    pub fn canonical_string(&self, request_target: &str) -> String {
        format!(
            "(request-target): {}\ndate: {}\ndigest: {}\nx-request-nonce: {}\nx-request-timestamp: {}",
            request_target, self.date, self.digest, self.nonce, self.timestamp
        )
    }
}
