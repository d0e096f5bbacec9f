//! `multipart/form-data` encoding for batch requests.
//!
//! The body is assembled in memory rather than streamed so the request
//! signer can digest it.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::upload::batch::Batch;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const JSON: &str = "application/json";

#[derive(Debug)]
pub struct MultipartBody {
    boundary: String,
    buffer: BytesMut,
    parts: usize,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::with_boundary(format!("research-uplink-{}", Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        MultipartBody {
            boundary: boundary.into(),
            buffer: BytesMut::new(),
            parts: 0,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn part_count(&self) -> usize {
        self.parts
    }

    /// Value for the `Content-Type` request header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn add_part(&mut self, name: &str, file_name: Option<&str>, content_type: &str, data: &[u8]) {
        self.buffer.put_slice(b"--");
        self.buffer.put_slice(self.boundary.as_bytes());
        self.buffer.put_slice(b"\r\n");

        let disposition = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quoted(name),
                escape_quoted(file_name)
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", escape_quoted(name)),
        };
        self.buffer.put_slice(disposition.as_bytes());
        self.buffer.put_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        self.buffer.put_slice(data);
        self.buffer.put_slice(b"\r\n");
        self.parts += 1;
    }

    /// Close the body with the terminating boundary.
    pub fn finish(mut self) -> Bytes {
        self.buffer.put_slice(b"--");
        self.buffer.put_slice(self.boundary.as_bytes());
        self.buffer.put_slice(b"--\r\n");
        self.buffer.freeze()
    }
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

/// Encode a batch: `file1..fileN` carry the envelopes, `key1..keyN` the
/// matching key sidecars where one exists.
pub async fn encode_batch(batch: &Batch) -> std::io::Result<MultipartBody> {
    let mut body = MultipartBody::new();

    for (i, envelope) in batch.envelopes.iter().enumerate() {
        let number = i + 1;
        let data = tokio::fs::read(&envelope.path).await?;
        body.add_part(
            &format!("file{}", number),
            Some(&envelope.file_name),
            OCTET_STREAM,
            &data,
        );

        if let Some(sidecar) = &envelope.sidecar {
            let metadata = tokio::fs::read(sidecar).await?;
            let sidecar_name = sidecar
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            body.add_part(&format!("key{}", number), Some(&sidecar_name), JSON, &metadata);
        }
    }

    Ok(body)
}
