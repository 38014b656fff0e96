//! Cursor-based iteration over every document of an index.

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::traits::IndexEngine;
use crate::types::Chunk;

pub const DEFAULT_SCAN_PAGE_SIZE: usize = 256;

/// Sort values of the last document of a page (`search_after`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCursor(pub Vec<Value>);

#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub hits: Vec<Chunk>,
    pub cursor: Option<ScanCursor>,
}

/// Restartable scan. A failed page leaves the cursor where it was, so calling
/// [`IndexScan::next_batch`] again retries the same page.
pub struct IndexScan<'a> {
    engine: &'a dyn IndexEngine,
    index: String,
    page_size: usize,
    cursor: Option<ScanCursor>,
    exhausted: bool,
}

impl<'a> IndexScan<'a> {
    pub fn new(engine: &'a dyn IndexEngine, index: impl Into<String>) -> Self {
        Self {
            engine,
            index: index.into(),
            page_size: DEFAULT_SCAN_PAGE_SIZE,
            cursor: None,
            exhausted: false,
        }
    }

    /// Continues a scan from a saved continuation token.
    pub fn resume(engine: &'a dyn IndexEngine, index: impl Into<String>, cursor: ScanCursor) -> Self {
        let mut scan = Self::new(engine, index);
        scan.cursor = Some(cursor);
        scan
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn cursor(&self) -> Option<&ScanCursor> {
        self.cursor.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub async fn next_batch(&mut self) -> Result<Option<Vec<Chunk>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .engine
            .scan(&self.index, self.page_size, self.cursor.as_ref())
            .await?;
        if page.hits.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        let cursor = page.cursor.ok_or_else(|| {
            Error::Operation(format!("scan of '{}' returned hits without a cursor", self.index))
        })?;
        self.cursor = Some(cursor);
        Ok(Some(page.hits))
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Chunk>>> + 'a {
        stream::try_unfold(self, |mut scan| async move {
            Ok(scan.next_batch().await?.map(|batch| (batch, scan)))
        })
    }
}
