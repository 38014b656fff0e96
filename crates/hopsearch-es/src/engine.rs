use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use hopsearch_core::config::EngineSettings;
use hopsearch_core::query::SearchRequest;
use hopsearch_core::scan::{ScanCursor, ScanPage};
use hopsearch_core::schema::IndexSchema;
use hopsearch_core::traits::IndexEngine;
use hopsearch_core::types::{Chunk, SearchHit};
use hopsearch_core::{Error, Result};

use crate::client::{read_json, status_error, EsClient};
use crate::wire::{self, BulkResponse, CountResponse, DocFields, GetResponse, SearchResponse};

/// [`IndexEngine`] backed by an Elasticsearch cluster.
///
/// Field names of indexes created through this engine are remembered; other
/// indexes are assumed to use the default `content` and `embedding` fields.
pub struct EsEngine {
    client: EsClient,
    fields: RwLock<HashMap<String, DocFields>>,
}

impl EsEngine {
    pub fn new(client: EsClient) -> Self {
        Self {
            client,
            fields: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let client = EsClient::new(
            &settings.url,
            Duration::from_secs(settings.bulk_timeout_secs),
            Duration::from_secs(settings.query_timeout_secs),
        )?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &EsClient {
        &self.client
    }

    fn fields_of(&self, index: &str) -> DocFields {
        self.fields
            .read()
            .ok()
            .and_then(|m| m.get(index).cloned())
            .unwrap_or_default()
    }

    async fn search_raw(&self, index: &str, vector_field: &str, body: &Value) -> Result<SearchResponse> {
        let mut url = self.client.url(&[index, "_search"])?;
        url.query_pairs_mut().append_pair("_source_excludes", vector_field);
        let raw = self.client.send_json(self.client.query().post(url).json(body)).await?;
        Ok(serde_json::from_value(raw)?)
    }
}

#[async_trait]
impl IndexEngine for EsEngine {
    fn base_uri(&self) -> String {
        self.client.base_url().as_str().trim_end_matches('/').to_string()
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = self.client.url(&[index])?;
        let response = self.client.send(self.client.query().head(url)).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(s, &Value::Null)),
        }
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        schema.validate()?;
        let url = self.client.url(&[index])?;
        let body = wire::create_index_body(schema);
        let response = self.client.send(self.client.admin().put(url).json(&body)).await?;
        let status = response.status();
        let body = read_json(response).await?;
        if status == StatusCode::BAD_REQUEST
            && wire::error_type(&body) == Some("resource_already_exists_exception")
        {
            return Err(Error::IndexAlreadyExists(index.to_string()));
        }
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        if let Ok(mut fields) = self.fields.write() {
            fields.insert(index.to_string(), DocFields::from(schema));
        }
        info!(index, dims = schema.vector_field.dims, "created index");
        Ok(())
    }

    async fn bulk_write(&self, index: &str, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let body = wire::bulk_body(index, chunks, &self.fields_of(index))?;
        let mut url = self.client.url(&["_bulk"])?;
        url.query_pairs_mut().append_pair("refresh", "wait_for");
        let request = self
            .client
            .admin()
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let raw = self.client.send_json(request).await?;
        let response: BulkResponse = serde_json::from_value(raw)?;
        if let Some(reason) = response.first_error() {
            warn!(index, %reason, "bulk write rejected");
            return Err(Error::Engine(anyhow::anyhow!("bulk write to '{index}' failed: {reason}")));
        }
        debug!(index, n = chunks.len(), "bulk write done");
        Ok(chunks.len())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let fields = self.fields_of(index);
        let response = self.search_raw(index, &fields.vector, &request.to_body()).await?;
        response
            .hits
            .hits
            .into_iter()
            .map(|hit| hit.into_search_hit(&fields))
            .collect()
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Chunk>> {
        let fields = self.fields_of(index);
        let mut url = self.client.url(&[index, "_doc", id])?;
        url.query_pairs_mut().append_pair("_source_excludes", &fields.vector);
        let response = self.client.send(self.client.query().get(url)).await?;
        let status = response.status();
        let body = read_json(response).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let doc: GetResponse = serde_json::from_value(body)?;
        doc.into_chunk(&fields)
    }

    async fn scan(&self, index: &str, page_size: usize, after: Option<&ScanCursor>) -> Result<ScanPage> {
        let fields = self.fields_of(index);
        let body = wire::scan_body(page_size, after);
        let response = self.search_raw(index, &fields.vector, &body).await?;
        let cursor = response
            .hits
            .hits
            .last()
            .and_then(|h| h.sort.clone())
            .map(ScanCursor);
        let hits = response
            .hits
            .hits
            .into_iter()
            .map(|hit| hit.into_chunk(&fields))
            .collect::<Result<Vec<_>>>()?;
        Ok(ScanPage { hits, cursor })
    }

    async fn count(&self, index: &str) -> Result<usize> {
        let url = self.client.url(&[index, "_count"])?;
        let raw = self.client.send_json(self.client.query().get(url)).await?;
        let response: CountResponse = serde_json::from_value(raw)?;
        Ok(response.count)
    }
}
