use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ENVELOPE_ALGORITHM, ENVELOPE_TIMESTAMP_FORMAT, KEY_SIDECAR_SUFFIX, NONCE_LEN, TAG_LEN,
};

/// Data kind understood by the research server, embedded in envelope names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Image,
    Gps,
    Text,
    Metadata,
    File,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Image => "image",
            DataKind::Gps => "gps",
            DataKind::Text => "text",
            DataKind::Metadata => "metadata",
            DataKind::File => "file",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(DataKind::Image),
            "gps" => Ok(DataKind::Gps),
            "text" => Ok(DataKind::Text),
            "metadata" => Ok(DataKind::Metadata),
            "file" => Ok(DataKind::File),
            other => Err(format!("unknown data kind: {}", other)),
        }
    }
}

/// What a capture producer says it recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureKind {
    Screenshot,
    Video,
    Gps,
    Location,
    Log,
    Metadata,
    Other(String),
}

impl CaptureKind {
    /// Parse a producer label such as `screenshot` or `gps`.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "screenshot" | "screen" => CaptureKind::Screenshot,
            "video" => CaptureKind::Video,
            "gps" => CaptureKind::Gps,
            "location" => CaptureKind::Location,
            "log" => CaptureKind::Log,
            "metadata" | "outbox" => CaptureKind::Metadata,
            other => CaptureKind::Other(other.to_string()),
        }
    }

    /// Infer the capture kind from a plaintext file name.
    ///
    /// The leading label (up to the first `_`, `-` or `.`) wins when it is a
    /// known producer label, otherwise the extension decides.
    pub fn infer(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let label = name.split(['_', '-', '.']).next().unwrap_or_default();
        match CaptureKind::from_label(label) {
            CaptureKind::Other(_) => {}
            known => return known,
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "png" | "jpg" | "jpeg" | "webp" => CaptureKind::Screenshot,
            "mp4" | "mov" | "webm" | "3gp" => CaptureKind::Video,
            "gpx" => CaptureKind::Gps,
            "json" => CaptureKind::Metadata,
            "log" | "txt" => CaptureKind::Log,
            _ => CaptureKind::Other(extension),
        }
    }

    pub fn data_kind(&self) -> DataKind {
        match self {
            CaptureKind::Screenshot | CaptureKind::Video => DataKind::Image,
            CaptureKind::Gps | CaptureKind::Location => DataKind::Gps,
            CaptureKind::Log => DataKind::Text,
            CaptureKind::Metadata => DataKind::Metadata,
            CaptureKind::Other(_) => DataKind::File,
        }
    }
}

/// A file deposited by a capture producer into the plaintext queue.
#[derive(Debug, Clone)]
pub struct PlaintextArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub created: DateTime<Local>,
    pub capture_kind: CaptureKind,
}

impl PlaintextArtifact {
    /// Read size and creation time from the filesystem.
    ///
    /// Falls back to the modification time where the platform does not
    /// record a creation time.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());

        Ok(PlaintextArtifact {
            path: path.to_path_buf(),
            size: metadata.len(),
            created,
            capture_kind: CaptureKind::infer(path),
        })
    }

    pub fn data_kind(&self) -> DataKind {
        self.capture_kind.data_kind()
    }

    /// Extension carried over to the envelope name (`bin` when absent).
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "bin".to_string())
    }
}

/// Structured form of an envelope file name:
/// `{short_id}_{timestamp}_{data_kind}_{nonce_hex}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeName {
    pub short_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub data_kind: DataKind,
    pub nonce_hex: String,
    pub extension: String,
}

impl EnvelopeName {
    pub fn new<Tz: TimeZone>(
        short_id: &str,
        timestamp: &DateTime<Tz>,
        data_kind: DataKind,
        nonce: &[u8; NONCE_LEN],
        extension: &str,
    ) -> Self {
        EnvelopeName {
            short_id: short_id.to_string(),
            timestamp: timestamp.fixed_offset(),
            data_kind,
            nonce_hex: hex::encode(nonce),
            extension: extension.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            self.short_id,
            self.timestamp.format(ENVELOPE_TIMESTAMP_FORMAT),
            self.data_kind,
            self.nonce_hex,
            self.extension
        )
    }

    /// Strict parse; `None` for anything that does not follow the convention.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, extension) = file_name.rsplit_once('.')?;
        let fields: Vec<&str> = stem.split('_').collect();
        if fields.len() != 4 || fields[0].is_empty() {
            return None;
        }

        let timestamp = DateTime::parse_from_str(fields[1], ENVELOPE_TIMESTAMP_FORMAT).ok()?;
        let data_kind = fields[2].parse().ok()?;
        let nonce_hex = fields[3];
        if nonce_hex.len() != NONCE_LEN * 2 || hex::decode(nonce_hex).is_err() {
            return None;
        }

        Some(EnvelopeName {
            short_id: fields[0].to_string(),
            timestamp,
            data_kind,
            nonce_hex: nonce_hex.to_string(),
            extension: extension.to_string(),
        })
    }

    /// Loose check for names written by older clients: fewer than four
    /// `_`-separated fields, or a second field that is not a timestamp.
    pub fn is_legacy(file_name: &str) -> bool {
        let stem = file_name.split('.').next().unwrap_or(file_name);
        let fields: Vec<&str> = stem.split('_').collect();
        if fields.len() < 4 {
            return true;
        }
        let timestamp = fields[1];
        !(timestamp.contains('T') && timestamp.contains('-'))
    }
}

impl fmt::Display for EnvelopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Out-of-band key material for one envelope, stored as
/// `<envelope>.key.json` until the envelope is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySidecar {
    pub wrapped_key: String,
    pub nonce: String,
    pub tag_bits: u32,
    pub data_kind: DataKind,
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<DateTime<Utc>>,
}

impl KeySidecar {
    pub fn new(wrapped_key: String, nonce: String, data_kind: DataKind) -> Self {
        KeySidecar {
            wrapped_key,
            nonce,
            tag_bits: (TAG_LEN * 8) as u32,
            data_kind,
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            sealed_at: Some(Utc::now()),
        }
    }

    /// Sidecar location for an envelope path.
    pub fn path_for(envelope: &Path) -> PathBuf {
        let mut name = envelope
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(KEY_SIDECAR_SUFFIX);
        envelope.with_file_name(name)
    }

    pub fn is_sidecar(path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy().ends_with(KEY_SIDECAR_SUFFIX))
            .unwrap_or(false)
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let content = fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}
