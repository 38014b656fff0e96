//! Elasticsearch index engine over the REST API.

pub mod client;
pub mod engine;
pub mod wire;

pub use client::EsClient;
pub use engine::EsEngine;
