use std::time::Duration;

use log::{debug, info};
use openssl::pkey::{PKey, Private};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Request};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, ENROLLMENT_TOKEN_MIN_LEN, ENROLL_PATH};
use crate::crypto::{load_public_key_pem, public_key_pem};
use crate::error::EnrollmentError;
use crate::security::scrub_credentials;
use crate::signing::RequestSigner;

/// What the participant typed or scanned to join a study.
///
/// Long secrets are server-issued tokens and travel as a bearer credential;
/// short ones are enrollment codes sent in the request body.
#[derive(Clone, PartialEq, Eq)]
pub enum EnrollmentSecret {
    Code(String),
    Token(String),
}

impl EnrollmentSecret {
    pub fn parse(secret: &str) -> Result<Self, EnrollmentError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(EnrollmentError::EmptySecret);
        }
        if secret.len() >= ENROLLMENT_TOKEN_MIN_LEN {
            Ok(EnrollmentSecret::Token(secret.to_string()))
        } else {
            Ok(EnrollmentSecret::Code(secret.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnrollmentSecret::Code(s) | EnrollmentSecret::Token(s) => s,
        }
    }

    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            EnrollmentSecret::Token(t) => Some(t),
            EnrollmentSecret::Code(_) => None,
        }
    }
}

impl std::fmt::Debug for EnrollmentSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentSecret::Code(_) => f.write_str("Code(<redacted>)"),
            EnrollmentSecret::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

#[derive(Debug, Serialize)]
struct EnrollRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    public_key_pem: &'a str,
    platform: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<String>,
}

/// Server answer to a successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnrollResponse {
    pub participant_id: String,
    pub study_id: String,
    pub upload_public_key_pem: String,
}

impl EnrollResponse {
    fn validate(self) -> Result<Self, EnrollmentError> {
        if self.participant_id.trim().is_empty() {
            return Err(EnrollmentError::InvalidResponse("empty participant_id".into()));
        }
        if self.study_id.trim().is_empty() {
            return Err(EnrollmentError::InvalidResponse("empty study_id".into()));
        }
        load_public_key_pem(self.upload_public_key_pem.as_bytes())
            .map_err(|e| EnrollmentError::InvalidResponse(format!("upload key: {}", e)))?;
        Ok(self)
    }
}

/// Exchanges an enrollment secret and a fresh identity key for study
/// coordinates and the server's upload key.
pub struct EnrollmentClient {
    client: Client,
    base_url: String,
    signer: RequestSigner,
}

impl EnrollmentClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnrollmentError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        EnrollmentClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer: RequestSigner::unenrolled(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, ENROLL_PATH)
    }

    pub fn build_request(
        &self,
        secret: &EnrollmentSecret,
        identity_key: &PKey<Private>,
    ) -> Result<Request, EnrollmentError> {
        let public_key = public_key_pem(identity_key)?;
        let payload = EnrollRequest {
            code: match secret {
                EnrollmentSecret::Code(c) => Some(c),
                EnrollmentSecret::Token(_) => None,
            },
            token: secret.bearer_token(),
            public_key_pem: &public_key,
            platform: std::env::consts::OS,
            device: hostname::get().ok().map(|h| h.to_string_lossy().into_owned()),
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| EnrollmentError::InvalidResponse(format!("request encoding: {}", e)))?;

        let mut builder = self
            .client
            .post(self.endpoint())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = secret.bearer_token() {
            builder = builder.bearer_auth(token);
        }

        // No identity yet, so the signer passes the request through unsigned.
        let mut request = builder.body(body).build()?;
        self.signer.sign(&mut request)?;
        Ok(request)
    }

    pub async fn enroll(
        &self,
        secret: &EnrollmentSecret,
        identity_key: &PKey<Private>,
    ) -> Result<EnrollResponse, EnrollmentError> {
        let request = self.build_request(secret, identity_key)?;
        info!("Enrolling with {}", self.endpoint());

        let response = self.client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Enrollment answered {}: {}", status, scrub_credentials(&body));

        if !status.is_success() {
            return Err(EnrollmentError::Rejected {
                status: status.as_u16(),
                body: scrub_credentials(&body),
            });
        }

        let parsed: EnrollResponse = serde_json::from_str(&body)
            .map_err(|e| EnrollmentError::InvalidResponse(e.to_string()))?;
        let parsed = parsed.validate()?;
        info!(
            "Enrolled as participant {} in study {}",
            parsed.participant_id, parsed.study_id
        );
        Ok(parsed)
    }
}
