use futures::{Stream, TryStreamExt};
use indicatif::ProgressBar;
use std::pin::pin;
use std::sync::Arc;
use tracing::{debug, info};

use hopsearch_core::chunking::{Chunker, SourceDocument};
use hopsearch_core::schema::IndexSchema;
use hopsearch_core::traits::{Embedder, IndexEngine, Tokenize, WhitespaceTokenizer};
use hopsearch_core::types::{Chunk, Triple};
use hopsearch_core::{Error, Result};

use crate::offload;

pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Turns one input document into the chunks written for it. `ordinal` is the
/// position of the document in the input stream.
pub trait Preprocess<D>: Send + Sync {
    fn preprocess(&self, ordinal: usize, doc: D) -> Result<Vec<Chunk>>;
}

/// Splits source documents with a [`Chunker`].
pub struct ChunkPreprocessor<T: Tokenize = WhitespaceTokenizer> {
    chunker: Chunker<T>,
}

impl<T: Tokenize> ChunkPreprocessor<T> {
    pub fn new(chunker: Chunker<T>) -> Self {
        Self { chunker }
    }
}

impl<T: Tokenize> Preprocess<SourceDocument> for ChunkPreprocessor<T> {
    fn preprocess(&self, _ordinal: usize, doc: SourceDocument) -> Result<Vec<Chunk>> {
        self.chunker.split(&doc)
    }
}

/// One triple document per triple.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriplePreprocessor;

impl Preprocess<Triple> for TriplePreprocessor {
    fn preprocess(&self, ordinal: usize, doc: Triple) -> Result<Vec<Chunk>> {
        Ok(vec![doc.to_chunk(ordinal)])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub batches: usize,
}

/// Creates an index and fills it: preprocess, embed, bulk write.
///
/// There is no upsert. Building into an existing index fails before anything
/// is written. A build that is cancelled midway leaves a partially filled
/// index behind; compare [`IndexEngine::count`] with the report to detect it.
pub struct IndexBuilder {
    engine: Arc<dyn IndexEngine>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    embed_batch_size: usize,
    progress: Option<ProgressBar>,
}

impl IndexBuilder {
    pub fn new(engine: Arc<dyn IndexEngine>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            engine,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            embed_batch_size: 32,
            progress: None,
        }
    }

    /// Number of chunks per bulk write.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_embed_batch_size(mut self, embed_batch_size: usize) -> Self {
        self.embed_batch_size = embed_batch_size.max(1);
        self
    }

    /// Advanced by one per chunk written.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn build_index<D, I, P>(&self, index: &str, schema: &IndexSchema, documents: I, preprocess: &P) -> Result<IndexReport>
    where
        I: IntoIterator<Item = D>,
        P: Preprocess<D> + ?Sized,
    {
        self.start(index, schema).await?;
        let mut report = IndexReport::default();
        let mut buffer: Vec<Chunk> = Vec::new();
        for (ordinal, doc) in documents.into_iter().enumerate() {
            buffer.extend(preprocess.preprocess(ordinal, doc)?);
            report.documents += 1;
            self.flush_full(index, &mut buffer, &mut report).await?;
        }
        self.finish(index, buffer, report).await
    }

    /// Like [`IndexBuilder::build_index`], pulling documents from a fallible
    /// stream so the source never has to be held in memory. A stream error
    /// after creation leaves the batches already flushed in place.
    pub async fn build_index_from_stream<D, S, P>(&self, index: &str, schema: &IndexSchema, documents: S, preprocess: &P) -> Result<IndexReport>
    where
        S: Stream<Item = Result<D>>,
        P: Preprocess<D> + ?Sized,
    {
        self.start(index, schema).await?;
        let mut report = IndexReport::default();
        let mut buffer: Vec<Chunk> = Vec::new();
        let mut documents = pin!(documents);
        while let Some(doc) = documents.try_next().await? {
            buffer.extend(preprocess.preprocess(report.documents, doc)?);
            report.documents += 1;
            self.flush_full(index, &mut buffer, &mut report).await?;
        }
        self.finish(index, buffer, report).await
    }

    /// Every check that can fail without I/O on the target, then creation.
    async fn start(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        schema.validate()?;
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        if self.engine.index_exists(index).await? {
            return Err(Error::IndexAlreadyExists(index.to_string()));
        }
        let dims = self.embedder.dimension()?;
        if dims != schema.vector_field.dims {
            return Err(Error::DimensionMismatch {
                expected: schema.vector_field.dims,
                actual: dims,
            });
        }

        self.engine.create_index(index, schema).await?;
        info!(index, model = self.embedder.model_id(), batch_size = self.batch_size, "building index");
        Ok(())
    }

    async fn flush_full(&self, index: &str, buffer: &mut Vec<Chunk>, report: &mut IndexReport) -> Result<()> {
        while buffer.len() > self.batch_size {
            let batch: Vec<Chunk> = buffer.drain(..self.batch_size).collect();
            self.flush(index, batch, report).await?;
        }
        Ok(())
    }

    async fn finish(&self, index: &str, buffer: Vec<Chunk>, mut report: IndexReport) -> Result<IndexReport> {
        if !buffer.is_empty() {
            self.flush(index, buffer, &mut report).await?;
        }
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
        info!(
            index,
            documents = report.documents,
            chunks = report.chunks,
            batches = report.batches,
            "index built"
        );
        Ok(report)
    }

    async fn flush(&self, index: &str, mut batch: Vec<Chunk>, report: &mut IndexReport) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = offload::embed_many(&self.embedder, texts, self.embed_batch_size).await?;
        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            chunk.set_embedding(vector)?;
        }
        let written = self.engine.bulk_write(index, &batch).await?;
        report.chunks += written;
        report.batches += 1;
        if let Some(bar) = &self.progress {
            bar.inc(written as u64);
        }
        debug!(index, written, total = report.chunks, "flushed batch");
        Ok(())
    }
}
