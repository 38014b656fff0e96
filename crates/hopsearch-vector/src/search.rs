use anyhow::{anyhow, Result};
use arrow_array::{Float32Array, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};

use hopsearch_core::schema::Similarity;

use crate::writer::{VectorStore, TABLE_NAME};

impl VectorStore {
	/// Nearest `k` ids with a similarity score (higher is closer).
	pub async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
		if k == 0 || self.count().await? == 0 {
			return Ok(vec![]);
		}
		let table = self.db.open_table(TABLE_NAME).execute().await?;
		let mut stream = table.vector_search(vector.to_vec())?.distance_type(self.distance_type()).limit(k).execute().await?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("id column missing"))?;
			let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>()).ok_or_else(|| anyhow!("_distance column missing"))?;
			for i in 0..batch.num_rows() {
				hits.push((ids.value(i).to_string(), self.score(distances.value(i))));
			}
		}
		hits.sort_by(|a, b| b.1.total_cmp(&a.1));
		hits.truncate(k);
		Ok(hits)
	}

	fn score(&self, distance: f32) -> f32 {
		match self.similarity {
			Similarity::Cosine | Similarity::DotProduct => 1.0 - distance,
			Similarity::L2Norm => 1.0 / (1.0 + distance),
		}
	}
}
