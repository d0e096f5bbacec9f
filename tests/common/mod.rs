//! Shared helpers for integration tests: a throwaway RSA server key, queue
//! fixtures, and a mockito study server that records what it answers.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use mockito::{Matcher, Mock, Server, ServerGuard};
use openssl::pkey::{PKey, Private, Public};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Request, Url};

use research_uplink::crypto::{generate_rsa_key, public_key_pem};
use research_uplink::models::{DataKind, KeySidecar};

lazy_static! {
    static ref SERVER_KEY: PKey<Private> = generate_rsa_key(2048).unwrap();
    static ref CLIENT_KEY: PKey<Private> = generate_rsa_key(2048).unwrap();
}

/// The study server's upload key pair.
pub fn server_key() -> &'static PKey<Private> {
    &SERVER_KEY
}

pub fn server_public_pem() -> String {
    public_key_pem(&SERVER_KEY).unwrap()
}

/// A participant identity key distinct from the server key.
pub fn client_key() -> &'static PKey<Private> {
    &CLIENT_KEY
}

pub fn public_of(key: &PKey<Private>) -> PKey<Public> {
    PKey::public_key_from_pem(public_key_pem(key).unwrap().as_bytes()).unwrap()
}

pub fn envelope_name(i: usize) -> String {
    format!("1a2b3c4d_2025-09-29T120812-0500_image_{:024x}.png", i)
}

pub fn write_envelope(dir: &Path, i: usize) -> PathBuf {
    let path = dir.join(envelope_name(i));
    fs::write(&path, format!("ciphertext-{}", i)).unwrap();
    KeySidecar::new(format!("wrapped-{}", i), format!("nonce-{}", i), DataKind::Image)
        .write(&KeySidecar::path_for(&path))
        .unwrap();
    path
}

pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Upload endpoint of the test participant.
pub const UPLOAD_PATH: &str = "/api/v1/img/study-3/ppt-7";

/// Headers kept from each answered request.
const RECORDED_HEADERS: &[&str] = &[
    "accept",
    "authorization",
    "content-type",
    "date",
    "digest",
    "signature",
    "x-participant-id",
    "x-request-id",
    "x-request-nonce",
    "x-request-timestamp",
    "x-study-id",
];

/// One request as answered by the study server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl From<&mockito::Request> for RecordedRequest {
    fn from(request: &mockito::Request) -> Self {
        let headers = RECORDED_HEADERS
            .iter()
            .flat_map(|name| {
                request
                    .header(*name)
                    .into_iter()
                    .filter_map(|value| value.to_str().ok())
                    .map(|value| (name.to_string(), value.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();

        RecordedRequest {
            method: request.method().to_string(),
            path: request.path().to_string(),
            headers,
            body: request.body().cloned().unwrap_or_default(),
        }
    }
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Rebuild a reqwest request so signatures can be checked with the
    /// library's own verifier.
    pub fn to_request(&self, base_url: &str) -> Request {
        let url = Url::parse(&format!("{}{}", base_url, self.path)).unwrap();
        let mut request = Request::new(Method::from_bytes(self.method.as_bytes()).unwrap(), url);
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        *request.headers_mut() = headers;
        *request.body_mut() = Some(self.body.clone().into());
        request
    }

    /// Split the multipart/form-data body into `(part headers, data)` pairs.
    pub fn multipart_parts(&self) -> Vec<(String, Vec<u8>)> {
        let boundary = self
            .header("content-type")
            .and_then(|ct| ct.split("boundary=").nth(1))
            .unwrap();
        let delimiter = format!("\r\n--{}", boundary);

        // Prefix a CRLF so every delimiter, the first included, looks alike
        let mut body = b"\r\n".to_vec();
        body.extend_from_slice(&self.body);

        split(&body, delimiter.as_bytes())
            .into_iter()
            .skip(1)
            .take_while(|part| !part.starts_with(b"--"))
            .map(|part| {
                let part = &part[2..];
                let header_end = find(part, b"\r\n\r\n").unwrap();
                (
                    String::from_utf8_lossy(&part[..header_end]).to_string(),
                    part[header_end + 4..].to_vec(),
                )
            })
            .collect()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split<'a>(mut haystack: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut pieces = Vec::new();
    while let Some(at) = find(haystack, delimiter) {
        pieces.push(&haystack[..at]);
        haystack = &haystack[at + delimiter.len()..];
    }
    pieces.push(haystack);
    pieces
}

/// A mockito server standing in for the study server.
///
/// Routes are mockito mocks built with [`StubServer::on`] and registered
/// with [`StubServer::answer`]; every request a route answers is recorded.
pub struct StubServer {
    server: ServerGuard,
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    mocks: Vec<Mock>,
}

impl StubServer {
    pub async fn start() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        StubServer {
            server,
            base_url,
            requests: Arc::new(Mutex::new(Vec::new())),
            mocks: Vec::new(),
        }
    }

    /// Begin a route; add matchers and an expected hit count, then pass it
    /// to [`answer`](Self::answer).
    pub fn on(&mut self, method: &str, path: impl Into<Matcher>) -> Mock {
        self.server.mock(method, path)
    }

    pub async fn answer(&mut self, mock: Mock, status: usize, body: impl Into<String>) {
        let recorded = Arc::clone(&self.requests);
        let body = body.into();
        let mock = mock
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |request| {
                recorded.lock().unwrap().push(RecordedRequest::from(request));
                body.clone().into_bytes()
            })
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// Requests answered so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Check every route was hit as often as it expects.
    pub async fn assert_routes(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }
}
