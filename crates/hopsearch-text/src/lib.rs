pub mod tantivy_utils;
pub mod index;
pub mod search;

pub use index::TextStore;
pub use tantivy_utils::resolve_analyzer;
