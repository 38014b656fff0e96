use anyhow::anyhow;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use hopsearch_core::{Error, Result};

/// HTTP access to one Elasticsearch cluster.
///
/// Bulk and admin calls go through a client with a long timeout; searches use
/// the shorter query timeout.
#[derive(Debug, Clone)]
pub struct EsClient {
    base: Url,
    admin: Client,
    query: Client,
}

impl EsClient {
    pub fn new(base_url: &str, bulk_timeout: Duration, query_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::InvalidConfig(format!("engine url '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!("engine url '{base_url}' cannot be a base")));
        }
        let build = |timeout: Duration| {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))
        };
        Ok(Self {
            base,
            admin: build(bulk_timeout)?,
            query: build(query_timeout)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// URL of `segments` below the base, each segment percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig(format!("engine url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn admin(&self) -> &Client {
        &self.admin
    }

    pub fn query(&self) -> &Client {
        &self.query
    }

    /// Sends the request. Only transport failures are errors here; the
    /// status is left to the caller.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(classify)?;
        debug!(status = %response.status(), url = %response.url(), "engine response");
        Ok(response)
    }

    /// Sends the request and decodes a successful JSON body.
    pub async fn send_json(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.send(request).await?;
        let status = response.status();
        let body = read_json(response).await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(status_error(status, &body))
        }
    }
}

pub(crate) async fn read_json(response: Response) -> Result<Value> {
    let bytes = response.bytes().await.map_err(classify)?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn classify(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::Transient(e.to_string())
    } else {
        Error::Engine(anyhow!(e))
    }
}

/// Maps a failed response to an error. Overload and server errors are
/// retryable.
pub fn status_error(status: StatusCode, body: &Value) -> Error {
    let reason = body
        .get("error")
        .map(|e| match e.get("reason").and_then(Value::as_str) {
            Some(r) => r.to_string(),
            None => e.to_string(),
        })
        .unwrap_or_else(|| status.to_string());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::Transient(format!("{status}: {reason}"))
    } else {
        Error::Engine(anyhow!("{status}: {reason}"))
    }
}
