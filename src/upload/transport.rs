use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Request};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, HEADER_PARTICIPANT_ID, HEADER_STUDY_ID, HTTP_CREATED,
    UPLOAD_PATH_PREFIX,
};
use crate::error::UploadError;
use crate::security::scrub_credentials;
use crate::signing::RequestSigner;
use crate::upload::batch::Batch;
use crate::upload::multipart::{encode_batch, JSON};

/// Server acknowledgment of a delivered batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub body: String,
}

/// Sends one batch and reports whether the server accepted it.
///
/// `Ok` means the batch was delivered and its files may be deleted; any
/// other outcome must leave them in place.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn submit(&self, batch: &Batch) -> Result<DeliveryReceipt, UploadError>;
}

/// Where batches go and who they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub base_url: String,
    pub study_id: String,
    pub participant_id: String,
    pub bearer_token: Option<String>,
}

impl UploadTarget {
    pub fn endpoint(&self) -> String {
        format!(
            "{}{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            UPLOAD_PATH_PREFIX,
            self.study_id,
            self.participant_id
        )
    }
}

/// Production transport: multipart POST, signed, 201 means delivered.
pub struct HttpBatchTransport {
    client: Client,
    target: UploadTarget,
    signer: RequestSigner,
}

impl HttpBatchTransport {
    pub fn new(target: UploadTarget, signer: RequestSigner, timeout: Duration) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, target, signer))
    }

    pub fn with_client(client: Client, target: UploadTarget, signer: RequestSigner) -> Self {
        HttpBatchTransport { client, target, signer }
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    /// Build and sign the request for a batch without sending it.
    pub async fn build_request(&self, batch: &Batch) -> Result<Request, UploadError> {
        let body = encode_batch(batch).await?;
        let content_type = body.content_type();

        let mut builder = self
            .client
            .post(self.target.endpoint())
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, content_type)
            .header(HEADER_PARTICIPANT_ID, &self.target.participant_id)
            .header(HEADER_STUDY_ID, &self.target.study_id);
        if let Some(token) = &self.target.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let mut request = builder.body(body.finish()).build()?;
        self.signer.sign(&mut request)?;
        Ok(request)
    }
}

#[async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn submit(&self, batch: &Batch) -> Result<DeliveryReceipt, UploadError> {
        let request = self.build_request(batch).await?;
        debug!(
            "Posting batch {} ({} envelopes) to {}",
            batch.index + 1,
            batch.len(),
            request.url()
        );

        let start = Instant::now();
        let response = self.client.execute(request).await?;
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not read response body for batch {}: {}", batch.index + 1, e);
                String::new()
            }
        };

        debug!(
            "Batch {} answered {} in {:?}: {}",
            batch.index + 1,
            status,
            start.elapsed(),
            scrub_credentials(&body)
        );

        if status == HTTP_CREATED {
            Ok(DeliveryReceipt { status, body })
        } else {
            Err(UploadError::Server { status, body })
        }
    }
}
