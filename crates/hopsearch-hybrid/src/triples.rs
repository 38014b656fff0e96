//! Building the triple index from the chunk index, and seeding beam search.

use futures::stream::{self, Stream, TryStreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

use hopsearch_core::scan::IndexScan;
use hopsearch_core::traits::IndexEngine;
use hopsearch_core::types::{Chunk, QueryMode, Triple};
use hopsearch_core::{Error, Result};

use crate::retriever::HybridRetriever;

/// Triples extracted per chunk, keyed by chunk text.
pub type ExtractedTriples = HashMap<String, Vec<Vec<Value>>>;

/// One line of an extraction file: either a map from chunk text to its
/// triples, as the extractor writes them, or an explicit record.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExtractedLine {
    Record {
        chunk: String,
        #[serde(default)]
        triples: Vec<Vec<Value>>,
    },
    Map(ExtractedTriples),
}

/// Reads JSON lines of `{"<chunk text>": [[...], ...]}` or
/// `{"chunk": "...", "triples": [[...], ...]}`. Later lines for the same
/// chunk text add to the earlier ones.
pub fn load_extracted(path: &Path) -> Result<ExtractedTriples> {
    let io_err = |e: std::io::Error| Error::Operation(format!("{}: {e}", path.display()));
    let file = std::fs::File::open(path).map_err(io_err)?;
    let mut out = ExtractedTriples::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ExtractedLine = serde_json::from_str(&line)
            .map_err(|e| Error::Operation(format!("{}:{}: malformed extraction record: {e}", path.display(), n + 1)))?;
        match record {
            ExtractedLine::Record { chunk, triples } => out.entry(chunk).or_default().extend(triples),
            ExtractedLine::Map(map) => {
                for (chunk, triples) in map {
                    out.entry(chunk).or_default().extend(triples);
                }
            }
        }
    }
    info!(path = %path.display(), chunks = out.len(), "loaded extracted triples");
    Ok(out)
}

/// Pairs the chunks of `chunk_index` with their extracted triples, one scan
/// page at a time.
///
/// Chunks without an entry are logged and skipped, as are empty triples and
/// triples of the wrong length. Non-string elements are stringified.
pub fn triple_stream<'a>(
    engine: &'a dyn IndexEngine,
    chunk_index: &str,
    extracted: &'a ExtractedTriples,
) -> impl Stream<Item = Result<Triple>> + 'a {
    IndexScan::new(engine, chunk_index)
        .into_stream()
        .map_ok(move |page| {
            let triples: Vec<Result<Triple>> = page.iter().flat_map(|c| triples_of(c, extracted)).map(Ok).collect();
            stream::iter(triples)
        })
        .try_flatten()
}

/// [`triple_stream`] collected into memory.
pub async fn prepare_triples(engine: &dyn IndexEngine, chunk_index: &str, extracted: &ExtractedTriples) -> Result<Vec<Triple>> {
    let triples: Vec<Triple> = triple_stream(engine, chunk_index, extracted).try_collect().await?;
    info!(chunk_index, triples = triples.len(), "prepared triples");
    Ok(triples)
}

fn triples_of(chunk: &Chunk, extracted: &ExtractedTriples) -> Vec<Triple> {
    let Some(found) = extracted.get(&chunk.text) else {
        warn!(chunk_id = %chunk.id, "no triples extracted for chunk");
        return vec![];
    };
    let mut triples = Vec::with_capacity(found.len());
    for raw in found.iter().filter(|r| !r.is_empty()) {
        let elements: Vec<String> = raw
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        match Triple::new(elements, chunk.id.clone()) {
            Ok(t) => triples.push(t),
            Err(e) => warn!(chunk_id = %chunk.id, error = %e, "skipping triple"),
        }
    }
    triples
}

/// Hybrid search over a triple index for the starting points of a beam
/// search. Hits that are not triple documents are skipped.
pub async fn seed_triples(retriever: &HybridRetriever, query: &str, k: usize) -> Result<Vec<Triple>> {
    let ranked = retriever.retrieve(query, k, QueryMode::Hybrid).await?;
    let mut seeds = Vec::with_capacity(ranked.len());
    for entry in ranked.iter() {
        match Triple::from_chunk(&entry.item) {
            Ok(t) => seeds.push(t),
            Err(e) => warn!(id = %entry.item.id, error = %e, "hit is not a triple"),
        }
    }
    debug!(query, seeds = seeds.len(), "seed triples");
    Ok(seeds)
}
