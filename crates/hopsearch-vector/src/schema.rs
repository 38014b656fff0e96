use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const VECTOR_COLUMN: &str = "vector";

/// One row per chunk: its id, the embedding and when it was written.
pub fn build_arrow_schema(dims: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dims as i32), true),
		Field::new("indexed_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
	]))
}
