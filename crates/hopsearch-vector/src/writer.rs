//! Vector side of one search index.
use anyhow::{anyhow, ensure, Result};
use arrow_array::{FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use lancedb::{Connection, DistanceType};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use hopsearch_core::schema::Similarity;

use crate::schema::build_arrow_schema;
use crate::table::{create_empty_table, open_db, table_exists};

pub const TABLE_NAME: &str = "vectors";

pub struct VectorStore {
	pub(crate) db: Connection,
	pub(crate) dims: usize,
	pub(crate) similarity: Similarity,
}

impl VectorStore {
	pub async fn create(dir: &Path, dims: usize, similarity: Similarity) -> Result<Self> {
		std::fs::create_dir_all(dir)?;
		let db = open_db(dir.to_string_lossy().as_ref()).await?;
		create_empty_table(&db, TABLE_NAME, build_arrow_schema(dims)).await?;
		Ok(Self { db, dims, similarity })
	}

	pub async fn open(dir: &Path, dims: usize, similarity: Similarity) -> Result<Self> {
		let db = open_db(dir.to_string_lossy().as_ref()).await?;
		if !table_exists(&db, TABLE_NAME).await? {
			return Err(anyhow!("no vector table in {}", dir.display()));
		}
		Ok(Self { db, dims, similarity })
	}

	pub(crate) fn distance_type(&self) -> DistanceType {
		match self.similarity {
			Similarity::Cosine => DistanceType::Cosine,
			Similarity::DotProduct => DistanceType::Dot,
			Similarity::L2Norm => DistanceType::L2,
		}
	}

	pub async fn add(&self, rows: &[(&str, &[f32])]) -> Result<usize> {
		if rows.is_empty() {
			return Ok(0);
		}
		for (id, v) in rows {
			ensure!(v.len() == self.dims, "vector of '{}' has {} dims, table has {}", id, v.len(), self.dims);
		}
		let schema = build_arrow_schema(self.dims);
		let now = Utc::now().timestamp_millis();
		let ids = StringArray::from(rows.iter().map(|(id, _)| id.to_string()).collect::<Vec<_>>());
		let vectors = FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
			rows.iter().map(|(_, v)| Some(v.iter().map(|&x| Some(x)).collect::<Vec<_>>())),
			self.dims as i32,
		);
		let stamps = TimestampMillisecondArray::from(vec![now; rows.len()]);
		let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(ids), Arc::new(vectors), Arc::new(stamps)])?;
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		self.db.open_table(TABLE_NAME).execute().await?.add(reader).execute().await?;
		debug!(rows = rows.len(), "vector rows added");
		Ok(rows.len())
	}

	pub async fn count(&self) -> Result<usize> {
		Ok(self.db.open_table(TABLE_NAME).execute().await?.count_rows(None).await?)
	}
}
