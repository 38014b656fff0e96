//! LanceDB-backed vector store.
pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

pub use writer::VectorStore;
