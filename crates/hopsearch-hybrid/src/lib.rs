//! Retrieval on top of an [`IndexEngine`](hopsearch_core::traits::IndexEngine):
//! rank fusion, the hybrid retriever, index building, triple preparation and
//! multi-hop beam search over a triple index.

pub mod beam;
pub mod fusion;
pub mod indexer;
pub mod local;
pub mod retriever;
pub mod triples;

mod offload;

pub use beam::{BeamConfig, TripleBeam, TripleBeamSearch};
pub use fusion::{fuse_ranked, reciprocal_rank_fusion, weighted_reciprocal_rank_fusion, RrfConfig};
pub use indexer::{ChunkPreprocessor, IndexBuilder, IndexReport, Preprocess, TriplePreprocessor};
pub use local::LocalEngine;
pub use retriever::{HybridRetriever, RetrieverConfig};
pub use triples::{load_extracted, prepare_triples, seed_triples, triple_stream, ExtractedTriples};
