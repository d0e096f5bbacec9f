//! Security utilities.
//!
//! Currently credential scrubbing, applied to anything that may carry a
//! signature, token or key before it is logged.

pub mod credential_scrubber;

pub use credential_scrubber::{safe_error_message, scrub_credentials};
