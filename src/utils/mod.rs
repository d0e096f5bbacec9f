//! Utility functions shared across the pipeline.
//!
//! ### Generating File Hashes
//!
//! ```no_run
//! use research_uplink::utils::hash::sha256_file_hex;
//! use std::path::Path;
//!
//! # fn example() -> std::io::Result<()> {
//! let digest = sha256_file_hex(Path::new("/var/lib/research-uplink/encrypt/a.png"))?;
//! println!("SHA-256: {}", digest);
//! # Ok(())
//! # }
//! ```

/// Cryptographic hash calculation utilities
pub mod hash;
