//! HTTP request signing.
//!
//! Requests carry `Date`, `Digest`, `X-Request-Nonce` and
//! `X-Request-Timestamp` headers plus a `Signature` header over the
//! canonical string built from them and the request target. Signing is
//! RSA-PSS with SHA-256 where the key allows it, PKCS#1 v1.5 otherwise.

pub mod canonical;
pub mod identity;
pub mod signer;

pub use canonical::{body_digest, request_target, SignedFields};
pub use identity::SigningIdentity;
pub use signer::{verify, RequestSigner, SignatureAlgorithm, SignatureHeader};
