//! # OCI Distribution Client
//!
//! Minimal OCI distribution API client used to read component descriptors
//! and resource blobs, and to store produced artifacts.
//!
//! Authentication follows the registry token flow: requests are sent with
//! basic credentials, and a `401` carrying a `Bearer` challenge is answered
//! by fetching a token from the announced realm and retrying once.

use crate::ocm::effective::RegistryCredential;
use regex::Regex;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_EMPTY_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

static CHALLENGE_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).ok());

/// `sha256:<hex>` digest of `data`
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} not found")]
    NotFound { url: String },
    #[error("{method} {url} returned {status}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
    },
    #[error("authentication against {0} failed")]
    Unauthorized(String),
    #[error("invalid registry response: {0}")]
    InvalidResponse(String),
    #[error("invalid registry client configuration: {0}")]
    Configuration(String),
    #[error("blob digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

impl RegistryError {
    /// Transport failures, throttling and server errors are transient
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Http { .. } | RegistryError::Unauthorized(_) => true,
            RegistryError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            RegistryError::NotFound { .. }
            | RegistryError::InvalidResponse(_)
            | RegistryError::Configuration(_)
            | RegistryError::DigestMismatch { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RegistryError::Http { source, .. } if source.is_timeout())
    }
}

/// Content descriptor inside a manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Image manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: OciDescriptor,
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Connection settings of a registry client
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Use plain http
    pub insecure: bool,
    /// PEM bundle trusted in addition to the system roots
    pub root_ca: Option<Vec<u8>>,
    pub credential: Option<RegistryCredential>,
    pub timeout: Option<Duration>,
}

/// Client for one registry host
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base: String,
    host: String,
    credential: Option<RegistryCredential>,
}

impl RegistryClient {
    pub fn new(host: &str, options: RegistryOptions) -> Result<Self, RegistryError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(pem) = &options.root_ca {
            let certificate = reqwest::Certificate::from_pem(pem)
                .map_err(|e| RegistryError::Configuration(e.to_string()))?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder
            .build()
            .map_err(|e| RegistryError::Configuration(e.to_string()))?;
        let scheme = if options.insecure { "http" } else { "https" };
        Ok(Self {
            http,
            base: format!("{scheme}://{host}"),
            host: host.to_string(),
            credential: options.credential,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn build(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
        bearer: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(headers.clone());
        request = match (bearer, &self.credential) {
            (Some(token), _) => request.bearer_auth(token),
            (None, Some(credential)) => {
                request.basic_auth(&credential.username, Some(&credential.password))
            }
            (None, None) => request,
        };
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }
        request
    }

    async fn fetch_token(&self, challenge: &str, url: &str) -> Result<String, RegistryError> {
        let params: BTreeMap<String, String> = CHALLENGE_PARAM
            .as_ref()
            .map(|re| {
                re.captures_iter(challenge)
                    .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let realm = params
            .get("realm")
            .ok_or_else(|| RegistryError::Unauthorized(self.host.clone()))?;

        let query: Vec<(&str, &str)> = ["service", "scope"]
            .iter()
            .filter_map(|k| params.get(*k).map(|v| (*k, v.as_str())))
            .collect();
        let mut request = self.http.get(realm).query(&query);
        if let Some(credential) = &self.credential {
            request = request.basic_auth(&credential.username, Some(&credential.password));
        }
        let response = request.send().await.map_err(|source| RegistryError::Http {
            url: realm.clone(),
            source,
        })?;
        if !response.status().is_success() {
            debug!(status = %response.status(), url, "Token request rejected");
            return Err(RegistryError::Unauthorized(self.host.clone()));
        }
        let token: TokenResponse = response.json().await.map_err(|source| RegistryError::Http {
            url: realm.clone(),
            source,
        })?;
        token
            .token
            .or(token.access_token)
            .ok_or_else(|| RegistryError::InvalidResponse("token response without token".into()))
    }

    /// Send a request, answering one bearer challenge
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<reqwest::Response, RegistryError> {
        let http_error = |source| RegistryError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .build(&method, url, &headers, body, None)
            .send()
            .await
            .map_err(http_error)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !challenge.to_ascii_lowercase().starts_with("bearer") {
            return Err(RegistryError::Unauthorized(self.host.clone()));
        }
        let token = self.fetch_token(&challenge, url).await?;
        let response = self
            .build(&method, url, &headers, body, Some(&token))
            .send()
            .await
            .map_err(http_error)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::Unauthorized(self.host.clone()));
        }
        Ok(response)
    }

    fn check(
        method: &Method,
        url: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RegistryError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound {
                url: url.to_string(),
            }),
            status => Err(RegistryError::Status {
                method: method.clone(),
                url: url.to_string(),
                status,
            }),
        }
    }

    async fn bytes(url: &str, response: reqwest::Response) -> Result<Vec<u8>, RegistryError> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|source| RegistryError::Http {
                url: url.to_string(),
                source,
            })
    }

    /// Check that the registry answers the distribution API
    pub async fn ping(&self) -> Result<(), RegistryError> {
        let url = self.url("/v2/");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| RegistryError::Http {
                url: url.clone(),
                source,
            })?;
        // an auth challenge still proves the API is served
        if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(RegistryError::Status {
                method: Method::GET,
                url,
                status: response.status(),
            })
        }
    }

    /// All tags of a repository, following pagination links
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let mut tags = Vec::new();
        let mut next = Some(self.url(&format!("/v2/{repository}/tags/list")));
        while let Some(url) = next.take() {
            let response = self.send(Method::GET, &url, HeaderMap::new(), None).await?;
            let response = Self::check(&Method::GET, &url, response)?;
            next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(|link| link.split_once('<'))
                .and_then(|(_, rest)| rest.split_once('>'))
                .map(|(path, _)| {
                    if path.starts_with("http") {
                        path.to_string()
                    } else {
                        self.url(path)
                    }
                });
            let body = Self::bytes(&url, response).await?;
            let page: TagList = serde_json::from_slice(&body)
                .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;
            tags.extend(page.tags.unwrap_or_default());
        }
        Ok(tags)
    }

    /// Fetch a manifest by tag or digest
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(OciManifest, String), RegistryError> {
        let url = self.url(&format!("/v2/{repository}/manifests/{reference}"));
        let mut headers = HeaderMap::new();
        let accept = format!("{OCI_MANIFEST_MEDIA_TYPE}, {DOCKER_MANIFEST_MEDIA_TYPE}");
        if let Ok(value) = accept.parse() {
            headers.insert(ACCEPT, value);
        }
        let response = self.send(Method::GET, &url, headers, None).await?;
        let response = Self::check(&Method::GET, &url, response)?;
        let body = Self::bytes(&url, response).await?;
        let manifest: OciManifest = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::InvalidResponse(format!("manifest {reference}: {e}")))?;
        Ok((manifest, sha256_digest(&body)))
    }

    /// Fetch a blob and verify its digest
    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>, RegistryError> {
        let url = self.url(&format!("/v2/{repository}/blobs/{digest}"));
        let response = self.send(Method::GET, &url, HeaderMap::new(), None).await?;
        let response = Self::check(&Method::GET, &url, response)?;
        let body = Self::bytes(&url, response).await?;
        let actual = sha256_digest(&body);
        if digest.starts_with("sha256:") && actual != digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }
        Ok(body)
    }

    async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool, RegistryError> {
        let url = self.url(&format!("/v2/{repository}/blobs/{digest}"));
        let response = self.send(Method::HEAD, &url, HeaderMap::new(), None).await?;
        Ok(response.status().is_success())
    }

    /// Upload a blob (monolithic upload), returning its digest
    pub async fn push_blob(&self, repository: &str, data: &[u8]) -> Result<String, RegistryError> {
        let digest = sha256_digest(data);
        if self.blob_exists(repository, &digest).await? {
            return Ok(digest);
        }

        let url = self.url(&format!("/v2/{repository}/blobs/uploads/"));
        let response = self.send(Method::POST, &url, HeaderMap::new(), None).await?;
        let response = Self::check(&Method::POST, &url, response)?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::InvalidResponse("upload without location".into()))?;
        let location = if location.starts_with("http") {
            location.to_string()
        } else {
            self.url(location)
        };
        let separator = if location.contains('?') { '&' } else { '?' };
        let upload_url = format!("{location}{separator}digest={digest}");

        let mut headers = HeaderMap::new();
        if let Ok(value) = "application/octet-stream".parse() {
            headers.insert(CONTENT_TYPE, value);
        }
        let response = self
            .send(Method::PUT, &upload_url, headers, Some(data))
            .await?;
        Self::check(&Method::PUT, &upload_url, response)?;
        Ok(digest)
    }

    /// Upload a manifest under `reference`, returning its digest
    pub async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: &OciManifest,
    ) -> Result<String, RegistryError> {
        let body = serde_json::to_vec(manifest)
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;
        let url = self.url(&format!("/v2/{repository}/manifests/{reference}"));
        let mut headers = HeaderMap::new();
        if let Ok(value) = OCI_MANIFEST_MEDIA_TYPE.parse() {
            headers.insert(CONTENT_TYPE, value);
        }
        let response = self.send(Method::PUT, &url, headers, Some(&body)).await?;
        Self::check(&Method::PUT, &url, response)?;
        Ok(sha256_digest(&body))
    }

    /// Digest of the manifest behind `reference`, `None` when absent
    pub async fn head_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<String>, RegistryError> {
        let url = self.url(&format!("/v2/{repository}/manifests/{reference}"));
        let mut headers = HeaderMap::new();
        if let Ok(value) = OCI_MANIFEST_MEDIA_TYPE.parse() {
            headers.insert(ACCEPT, value);
        }
        let response = self.send(Method::HEAD, &url, headers, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(&Method::HEAD, &url, response)?;
        Ok(response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }

    pub async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<(), RegistryError> {
        let url = self.url(&format!("/v2/{repository}/manifests/{digest}"));
        let response = self.send(Method::DELETE, &url, HeaderMap::new(), None).await?;
        match Self::check(&Method::DELETE, &url, response) {
            Ok(_) | Err(RegistryError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_digest() {
        assert_eq!(
            sha256_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_manifest_parsing() {
        let manifest: OciManifest = serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST_MEDIA_TYPE,
            "config": {"mediaType": OCI_EMPTY_MEDIA_TYPE, "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a", "size": 2},
            "layers": [{"mediaType": "application/x-tar", "digest": "sha256:abc", "size": 10}]
        }))
        .unwrap();
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].size, 10);
    }

    #[test]
    fn test_error_classification() {
        let server = RegistryError::Status {
            method: Method::GET,
            url: "https://r/v2/".to_string(),
            status: StatusCode::BAD_GATEWAY,
        };
        assert!(server.is_retryable());
        let not_found = RegistryError::NotFound {
            url: "https://r/v2/x".to_string(),
        };
        assert!(!not_found.is_retryable());
        assert!(!RegistryError::DigestMismatch {
            expected: "a".to_string(),
            actual: "b".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_insecure_client_uses_http() {
        let client = RegistryClient::new(
            "localhost:5000",
            RegistryOptions {
                insecure: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(client.url("/v2/"), "http://localhost:5000/v2/");
    }
}
