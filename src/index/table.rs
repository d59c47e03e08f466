//! LanceDB table holding chunk vectors.

use crate::chunker::Chunk;
use crate::error::{DbError, Result};

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type};
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};

use std::sync::Arc;

/// A chunk row returned from a similarity query.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: Chunk,
    /// Cosine distance to the query vector (0 = identical direction).
    pub distance: f32,
}

/// One named chunk collection.
#[derive(Clone)]
pub struct ChunkTable {
    table: lancedb::Table,
    dimensions: i32,
}

impl ChunkTable {
    /// Open an existing collection. `Ok(None)` when it does not exist or its
    /// embedding column was written with a different dimension.
    pub async fn open(
        connection: &lancedb::Connection,
        name: &str,
        dimensions: usize,
    ) -> Result<Option<Self>> {
        let dimensions = dimension_i32(dimensions)?;
        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;
        if !names.iter().any(|existing| existing == name) {
            return Ok(None);
        }

        let table = connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let stored = Self::stored_dimensions(&table).await?;
        if stored != Some(dimensions) {
            tracing::warn!(
                collection = name,
                expected = dimensions,
                stored = ?stored,
                "collection embedding dimension does not match, treating as absent"
            );
            return Ok(None);
        }

        Ok(Some(Self { table, dimensions }))
    }

    /// Size of the `embedding` vectors a table was created with.
    async fn stored_dimensions(table: &lancedb::Table) -> Result<Option<i32>> {
        let schema = table
            .schema()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;
        let size = schema
            .field_with_name("embedding")
            .ok()
            .and_then(|field| match field.data_type() {
                arrow_schema::DataType::FixedSizeList(_, size) => Some(*size),
                _ => None,
            });
        Ok(size)
    }

    /// Create an empty collection, failing if one already exists.
    pub async fn create(
        connection: &lancedb::Connection,
        name: &str,
        dimensions: usize,
    ) -> Result<Self> {
        let dimensions = dimension_i32(dimensions)?;
        let schema = Arc::new(Self::schema(dimensions));
        let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), schema);

        let table = connection
            .create_table(name, Box::new(batches))
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        Ok(Self { table, dimensions })
    }

    /// Drop the named collection. A missing collection is not an error.
    pub async fn drop_if_exists(connection: &lancedb::Connection, name: &str) -> Result<()> {
        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;
        if !names.iter().any(|existing| existing == name) {
            return Ok(());
        }

        connection
            .drop_table(name, &[])
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;
        tracing::debug!(collection = name, "dropped collection");
        Ok(())
    }

    /// Insert chunks with their embeddings in a single batch.
    pub async fn insert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(DbError::LanceDb(format!(
                "chunk/embedding count mismatch: {} chunks, {} embeddings",
                chunks.len(),
                embeddings.len()
            ))
            .into());
        }
        if chunks.is_empty() {
            return Ok(());
        }
        if let Some(bad) = embeddings
            .iter()
            .find(|embedding| embedding.len() != self.dimensions as usize)
        {
            return Err(DbError::LanceDb(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                bad.len()
            ))
            .into());
        }

        let ids = StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()));
        let sources = StringArray::from_iter_values(chunks.iter().map(|c| c.source.as_str()));
        let indexes = Int32Array::from_iter_values(chunks.iter().map(|c| c.index as i32));
        let contents = StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str()));
        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            embeddings
                .iter()
                .map(|embedding| Some(embedding.iter().map(|v| Some(*v)).collect::<Vec<_>>())),
            self.dimensions,
        );

        let schema = Arc::new(Self::schema(self.dimensions));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(ids) as ArrayRef,
                Arc::new(sources) as ArrayRef,
                Arc::new(indexes) as ArrayRef,
                Arc::new(contents) as ArrayRef,
                Arc::new(vectors) as ArrayRef,
            ],
        )
        .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        Ok(())
    }

    /// Exhaustive cosine nearest-neighbour search, closest first.
    pub async fn vector_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        if query_embedding.len() != self.dimensions as usize {
            return Err(DbError::LanceDb(format!(
                "Query embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                query_embedding.len()
            ))
            .into());
        }

        let results: Vec<RecordBatch> = self
            .table
            .query()
            .nearest_to(query_embedding)
            .map_err(|e| DbError::LanceDb(e.to_string()))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let mut hits = Vec::new();
        for batch in results {
            if let (
                Some(id_col),
                Some(source_col),
                Some(index_col),
                Some(content_col),
                Some(dist_col),
            ) = (
                batch.column_by_name("id"),
                batch.column_by_name("source"),
                batch.column_by_name("chunk_index"),
                batch.column_by_name("content"),
                batch.column_by_name("_distance"),
            ) {
                let ids: &StringArray = id_col.as_string::<i32>();
                let sources: &StringArray = source_col.as_string::<i32>();
                let indexes: &arrow_array::PrimitiveArray<Int32Type> = index_col.as_primitive();
                let contents: &StringArray = content_col.as_string::<i32>();
                let dists: &arrow_array::PrimitiveArray<Float32Type> = dist_col.as_primitive();

                for i in 0..ids.len() {
                    if ids.is_valid(i) && dists.is_valid(i) {
                        hits.push(ChunkHit {
                            chunk: Chunk {
                                id: ids.value(i).to_string(),
                                source: sources.value(i).to_string(),
                                index: indexes.value(i).max(0) as usize,
                                text: contents.value(i).to_string(),
                            },
                            distance: dists.value(i),
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    /// Count all rows in the table.
    pub async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()).into())
    }

    fn schema(dimensions: i32) -> arrow_schema::Schema {
        arrow_schema::Schema::new(vec![
            arrow_schema::Field::new("id", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("source", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("chunk_index", arrow_schema::DataType::Int32, false),
            arrow_schema::Field::new("content", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new(
                "embedding",
                arrow_schema::DataType::FixedSizeList(
                    Arc::new(arrow_schema::Field::new(
                        "item",
                        arrow_schema::DataType::Float32,
                        true,
                    )),
                    dimensions,
                ),
                false,
            ),
        ])
    }
}

fn dimension_i32(dimensions: usize) -> Result<i32> {
    i32::try_from(dimensions)
        .ok()
        .filter(|d| *d > 0)
        .ok_or_else(|| DbError::LanceDb(format!("invalid embedding dimension: {dimensions}")).into())
}
