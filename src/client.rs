//! CouchDB HTTP Client
//!
//! Thin JSON-over-HTTP transport. Credentials embedded in the server URL
//! are sent as a basic-auth header and never appear in logs.

use std::time::Duration;

use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Default per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse a server address, assuming `http://` when no scheme is given
pub fn parse_host(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| Error::Config(format!("invalid server URL '{}': {}", raw, e)))?;
    if url.host_str().is_none() {
        return Err(Error::Config(format!("server URL '{}' has no host", raw)));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Render a URL with its password masked, for logs and error messages
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.password().is_some() {
        let _ = shown.set_password(Some("***"));
    }
    shown.to_string()
}

/// Check whether two URLs address the same server, ignoring credentials and path
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Error body returned by CouchDB on non-2xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

/// Acknowledgement returned by document writes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriteAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rev: String,
}

/// CouchDB client bound to one server
#[derive(Debug, Clone)]
pub struct CouchClient {
    /// Server origin, including any credentials
    host: Url,
    /// Shared HTTP connection pool
    http: reqwest::Client,
    /// Log requests at info instead of debug
    log_requests: bool,
}

impl CouchClient {
    /// Create a client for a server address with default settings
    pub fn new(server: &str) -> Result<Self> {
        Self::with_settings(parse_host(server)?, DEFAULT_TIMEOUT, false)
    }

    /// Create a client from configuration
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::with_settings(
            parse_host(&config.url)?,
            config.request_timeout(),
            config.log_requests,
        )
    }

    /// Create a client with explicit settings
    pub fn with_settings(host: Url, timeout: Duration, log_requests: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            host,
            http,
            log_requests,
        })
    }

    /// Client for another server, sharing this client's connection pool and settings
    pub fn for_host(&self, host: &Url) -> Self {
        let mut origin = host.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);

        Self {
            host: origin,
            http: self.http.clone(),
            log_requests: self.log_requests,
        }
    }

    /// Server origin (with credentials, if configured)
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Check whether a URL points at this client's server
    pub fn is_same_host(&self, other: &Url) -> bool {
        same_origin(&self.host, other)
    }

    /// Build a request URL from raw (unencoded) path segments
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.host.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| Error::InvalidResource(format!("cannot build a path on {}", redact(&self.host))))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    /// GET and decode a JSON body
    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<T> {
        let response = self.send(Method::GET, segments, query, None).await?;
        Ok(response.json().await?)
    }

    /// HEAD, discarding the (empty) body
    pub async fn head(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<()> {
        self.send(Method::HEAD, segments, query, None).await?;
        Ok(())
    }

    /// PUT a JSON payload and decode the JSON reply
    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
        payload: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(payload)?;
        let response = self.send(Method::PUT, segments, query, Some(body)).await?;
        Ok(response.json().await?)
    }

    /// DELETE and decode the JSON reply
    pub async fn delete<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<T> {
        let response = self.send(Method::DELETE, segments, query, None).await?;
        Ok(response.json().await?)
    }

    /// Issue a request, turning non-2xx replies into `Error::Couch`
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let mut url = self.url(segments)?;
        let username = url.username().to_string();
        let password = url.password().map(str::to_string);
        let _ = url.set_username("");
        let _ = url.set_password(None);

        let mut request = self.http.request(method.clone(), url.clone());
        if !query.is_empty() {
            request = request.query(query);
        }
        if !username.is_empty() {
            request = request.basic_auth(username, password);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(Error::Timeout(url.to_string())),
            Err(e) => {
                tracing::debug!(%method, %url, error = %e, "Request failed");
                return Err(e.into());
            }
        };

        let status = response.status();
        if self.log_requests {
            tracing::info!(%method, %url, status = status.as_u16(), "CouchDB request");
        } else {
            tracing::debug!(%method, %url, status = status.as_u16(), "CouchDB request");
        }

        if is_success(status) {
            return Ok(response);
        }

        // The error body is optional (HEAD never has one)
        let text = response.text().await.unwrap_or_default();
        let decoded: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        Err(Error::Couch {
            error: if decoded.error.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_lowercase()
            } else {
                decoded.error
            },
            reason: decoded.reason,
            status: status.as_u16(),
        })
    }
}

/// CouchDB answers 200, 201 or 202 on success
fn is_success(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200..=202)
}
