//! Global constants for the research-uplink pipeline.
//!
//! Defaults for the upload cadence, wire-format names and cryptographic
//! parameters live here so the modules that share them agree on one value.

// Upload orchestration defaults
/// Envelopes per multipart request
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Per-cycle cap on envelopes to send (0 = unlimited)
pub const DEFAULT_MAX_TO_SEND: usize = 0;

/// Ceiling for the adaptive concurrency budget
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 10;

/// Concurrency budget every session starts with
pub const INITIAL_CONCURRENCY_BUDGET: usize = 1;

/// Hard timeout for a single batch request (20 minutes)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 1200;

/// Connect timeout for the upload and enrollment clients
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Interval between scheduled upload cycles (12 hours)
pub const DEFAULT_TRIGGER_INTERVAL_SECS: u64 = 12 * 60 * 60;

/// The only status code treated as a delivered batch
pub const HTTP_CREATED: u16 = 201;

// Server endpoints
/// Base URL used when the configuration does not name one
pub const DEFAULT_BASE_URL: &str = "https://research.example.org";

/// Enrollment path, relative to the base URL
pub const ENROLL_PATH: &str = "/api/v1/enroll";

/// Upload path prefix; study and participant ids are appended
pub const UPLOAD_PATH_PREFIX: &str = "/api/v1/img";

// Cryptographic parameters
/// AES-256 key length in bytes
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// GCM nonce length in bytes (96 bits)
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes (128 bits)
pub const TAG_LEN: usize = 16;

/// RSA-PSS salt length in bytes
pub const PSS_SALT_LEN: i32 = 32;

/// Modulus size for freshly generated identity keys
pub const IDENTITY_KEY_BITS: u32 = 2048;

/// Streaming chunk size for sealing and opening envelopes (64KB)
pub const STREAMING_BUFFER_SIZE: usize = 64 * 1024;

/// Algorithm label recorded in key sidecars
pub const ENVELOPE_ALGORITHM: &str = "AES-256-GCM+RSA-OAEP-SHA256";

// File naming
/// Suffix of the JSON key sidecar written next to each envelope
pub const KEY_SIDECAR_SUFFIX: &str = ".key.json";

/// Suffix of an envelope that is still being written
pub const PARTIAL_SUFFIX: &str = ".part";

/// Length of the participant short id embedded in envelope names
pub const SHORT_ID_LEN: usize = 8;

/// Timestamp layout embedded in envelope names (colons removed)
pub const ENVELOPE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%z";

/// Enrollment secrets at least this long are bearer tokens, shorter ones are codes
pub const ENROLLMENT_TOKEN_MIN_LEN: usize = 64;

// Request signing headers
pub const HEADER_DATE: &str = "date";
pub const HEADER_DIGEST: &str = "digest";
pub const HEADER_SIGNATURE: &str = "signature";
pub const HEADER_REQUEST_NONCE: &str = "x-request-nonce";
pub const HEADER_REQUEST_TIMESTAMP: &str = "x-request-timestamp";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_PARTICIPANT_ID: &str = "x-participant-id";
pub const HEADER_STUDY_ID: &str = "x-study-id";

/// Headers covered by the signature, in canonical order
pub const SIGNED_HEADERS: &str = "(request-target) date digest x-request-nonce x-request-timestamp";

/// RFC 7231 IMF-fixdate layout
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// ISO-8601 UTC layout for `X-Request-Timestamp`
pub const REQUEST_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// Failure codes surfaced in session reports
pub const ERROR_CODE_PARTIAL_FAILURE: &str = "PARTIAL_FAILURE";
pub const ERROR_CODE_NO_WIFI: &str = "NOWIFI";
pub const ERROR_CODE_CANCELLED: &str = "CANCELLED";
