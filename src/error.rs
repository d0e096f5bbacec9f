//! Typed errors for the library seams.
//!
//! Each unit of work fails locally: a [`CryptoError`] aborts one artifact,
//! a [`SigningError`] aborts one request, an [`UploadError`] fails one batch
//! or, for the connectivity gate, the remainder of one session.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::constants::{ERROR_CODE_NO_WIFI, ERROR_CODE_PARTIAL_FAILURE};

/// Failures while sealing or opening an envelope.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed envelope {path}: {reason}")]
    MalformedEnvelope { path: PathBuf, reason: String },

    #[error("envelope {0} failed authentication")]
    Authentication(PathBuf),

    #[error("invalid base64 input: {0}")]
    Encoding(#[from] base64::DecodeError),
}

impl CryptoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CryptoError::Io { path: path.into(), source }
    }
}

/// Failures while producing or checking request signatures.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("request body is a stream and cannot be digested")]
    UnbufferedBody,

    #[error("invalid value for header {0}")]
    InvalidHeader(&'static str),

    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("malformed signature header: {0}")]
    MalformedSignature(String),

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("digest header does not match the request body")]
    DigestMismatch,

    #[error("signature does not verify")]
    InvalidSignature,

    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Failures of an upload session or a single batch.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("an upload session is already sending")]
    AlreadySending,

    #[error("no unmetered connection available and policy is wifi-only")]
    ConnectivityPolicy,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server responded with status {status}")]
    Server { status: u16, body: String },

    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("queue I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("batch task aborted: {0}")]
    Aborted(String),
}

impl UploadError {
    /// Whether the same batch may succeed on a later cycle without changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(_) | UploadError::Io(_) | UploadError::ConnectivityPolicy => true,
            UploadError::Server { status, .. } => *status >= 500,
            UploadError::AlreadySending => true,
            UploadError::Signing(_) | UploadError::Aborted(_) => false,
        }
    }

    /// Short code recorded in session reports.
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::AlreadySending => "ALREADY_SENDING",
            UploadError::ConnectivityPolicy => ERROR_CODE_NO_WIFI,
            UploadError::Transport(_) => "TRANSPORT",
            UploadError::Server { status, .. } if *status >= 500 => "SERVER_ERROR",
            UploadError::Server { .. } => "CLIENT_ERROR",
            UploadError::Signing(_) => "SIGNING",
            UploadError::Io(_) => "IO",
            UploadError::Aborted(_) => ERROR_CODE_PARTIAL_FAILURE,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Transport(err.to_string())
    }
}

/// Failures of the enrollment exchange.
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("enrollment secret is empty")]
    EmptySecret,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("enrollment rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid enrollment response: {0}")]
    InvalidResponse(String),

    #[error("identity key error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
}
