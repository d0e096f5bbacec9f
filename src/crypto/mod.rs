//! Per-artifact envelope encryption.
//!
//! Each artifact gets its own AES-256-GCM key and 96-bit nonce. The key is
//! wrapped with RSA-OAEP-SHA256 under the server's upload key and travels
//! beside the envelope, never inside it.

pub mod envelope;
pub mod keys;

pub use envelope::{open, open_to_path, open_to_writer, ArtifactEncryptor, SealedEnvelope};
pub use keys::{
    generate_rsa_key, load_private_key_file, load_private_key_pem, load_public_key_file,
    load_public_key_pem, private_key_to_pem, public_key_pem, unwrap_key, wrap_key,
};
