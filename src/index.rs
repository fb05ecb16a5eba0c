//! Search index collaborator.
//!
//! [`SearchIndex`] abstracts the document store written to by sync and the
//! stats job. [`ElasticClient`] implements it over the Elasticsearch REST API
//! with `reqwest`.
//!
//! # Hosts
//!
//! A client is built from an ordered host list. Each request goes to the
//! first host; when a host cannot be reached the next one is tried. HTTP
//! error responses are not retried on other hosts.
//!
//! # Error classification
//!
//! | Response | Error |
//! |----------|-------|
//! | 400 with a parse/encoding error type or reason | [`IndexError::Encoding`] |
//! | other 4xx | [`IndexError::Rejected`] |
//! | 5xx, connection failure, timeout | [`IndexError::Transport`] |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::IndexError;

/// Document store with search and aggregation support.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or replace the document `id` in `index`.
    async fn index_document(&self, index: &str, id: &str, body: &Value) -> Result<(), IndexError>;

    /// Delete a document. Returns `false` when it did not exist.
    async fn delete_document(&self, index: &str, id: &str) -> Result<bool, IndexError>;

    /// Fetch a document's source, or `None` if it does not exist.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError>;

    /// Run a search request body and return the raw response.
    async fn search(&self, index: &str, body: &Value) -> Result<Value, IndexError>;
}

/// Elasticsearch REST client.
pub struct ElasticClient {
    client: reqwest::Client,
    hosts: Vec<String>,
}

impl ElasticClient {
    pub fn new(hosts: &[String], timeout_secs: u64) -> Result<Self, IndexError> {
        if hosts.is_empty() {
            return Err(IndexError::Transport("no index hosts configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            hosts: hosts
                .iter()
                .map(|h| h.trim_end_matches('/').to_string())
                .collect(),
        })
    }

    /// Send a request to the first reachable host.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value), IndexError> {
        let mut last_err = None;

        for host in &self.hosts {
            let url = format!("{}/{}", host, path);
            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await?;
                    let json = if text.trim().is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&text).unwrap_or(Value::String(text))
                    };
                    debug!(%method, %url, status = status.as_u16(), "index request");
                    return Ok((status, json));
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(host = %host, error = %e, "index host unreachable, trying next");
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .map(IndexError::from)
            .unwrap_or_else(|| IndexError::Transport("all index hosts failed".into())))
    }
}

#[async_trait]
impl SearchIndex for ElasticClient {
    async fn index_document(&self, index: &str, id: &str, body: &Value) -> Result<(), IndexError> {
        let path = format!("{}/_doc/{}", index, id);
        let (status, response) = self.send(Method::PUT, &path, Some(body)).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_error(status, &response))
        }
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<bool, IndexError> {
        let path = format!("{}/_doc/{}", index, id);
        let (status, response) = self.send(Method::DELETE, &path, None).await?;
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(classify_error(s, &response)),
        }
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError> {
        let path = format!("{}/_doc/{}", index, id);
        let (status, response) = self.send(Method::GET, &path, None).await?;
        match status {
            s if s.is_success() => Ok(response.get("_source").cloned()),
            StatusCode::NOT_FOUND => Ok(None),
            s => Err(classify_error(s, &response)),
        }
    }

    async fn search(&self, index: &str, body: &Value) -> Result<Value, IndexError> {
        let path = format!("{}/_search", index);
        let (status, response) = self.send(Method::POST, &path, Some(body)).await?;
        if status.is_success() {
            Ok(response)
        } else {
            Err(classify_error(status, &response))
        }
    }
}

const ENCODING_ERROR_TYPES: &[&str] = &[
    "mapper_parsing_exception",
    "json_parse_exception",
    "x_content_parse_exception",
    "not_x_content_exception",
];

/// Map an error response to an [`IndexError`].
pub fn classify_error(status: StatusCode, body: &Value) -> IndexError {
    let reason = error_reason(body);
    let code = status.as_u16();

    if status.is_server_error() {
        return IndexError::Transport(format!("HTTP {}: {}", code, reason));
    }
    if status == StatusCode::BAD_REQUEST && is_encoding_problem(body) {
        return IndexError::Encoding {
            status: code,
            reason,
        };
    }
    IndexError::Rejected {
        status: code,
        reason,
    }
}

fn is_encoding_problem(body: &Value) -> bool {
    let mut error = body.get("error");
    while let Some(err) = error {
        let kind = err.get("type").and_then(Value::as_str).unwrap_or_default();
        if ENCODING_ERROR_TYPES.contains(&kind) {
            return true;
        }
        let reason = err
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if reason.contains("utf") || reason.contains("encoding") {
            return true;
        }
        error = err.get("caused_by");
    }
    false
}

fn error_reason(body: &Value) -> String {
    match body.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(err) => err
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        None => body.to_string(),
    }
}

/// Read `hits.total` from a search response.
///
/// Accepts both the integer form and the `{ "value": n }` object form.
pub fn hits_total(response: &Value) -> Option<u64> {
    let total = response.get("hits")?.get("total")?;
    total
        .as_u64()
        .or_else(|| total.get("value").and_then(Value::as_u64))
}
