/// Vector store abstraction and its LanceDB implementation.
///
/// A `VectorCatalog` hands out named `VectorTable`s; a table stores one row per key and
/// answers nearest-neighbor queries ordered by ascending L2 distance. The LanceDB table
/// schema is:
/// - id: Utf8 (not null)
/// - text: Utf8 (not null), the text that was embedded
/// - embedding: FixedSizeList<Float32, dimensions> (not null)
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{info, warn};

use crate::error::CommonError;

/// A row to be written: key, the text that was embedded, and its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A search hit. Lower `distance` means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub text: String,
    pub distance: f32,
}

#[async_trait]
pub trait VectorTable: Send + Sync {
    fn name(&self) -> &str;

    async fn contains(&self, id: &str) -> Result<bool, CommonError>;

    async fn insert(&self, row: VectorRow) -> Result<(), CommonError>;

    /// Up to `limit` rows closest to `query`, nearest first.
    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor>, CommonError>;

    async fn count(&self) -> Result<usize, CommonError>;
}

#[async_trait]
pub trait VectorCatalog: Send + Sync {
    /// Return the table called `name`, creating an empty one if it does not exist yet.
    async fn open_or_create(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<Arc<dyn VectorTable>, CommonError>;
}

pub struct VectorDb {
    db: lancedb::Connection,
}

impl VectorDb {
    /// Connect to a LanceDB database at the given filesystem path.
    pub async fn connect(path: &str) -> Result<Self, CommonError> {
        let db = lancedb::connect(path)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("connection failed: {e}")))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl VectorCatalog for VectorDb {
    async fn open_or_create(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<Arc<dyn VectorTable>, CommonError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("listing tables failed: {e}")))?;

        let table = if names.iter().any(|n| n == name) {
            self.db
                .open_table(name)
                .execute()
                .await
                .map_err(|e| CommonError::VectorDb(format!("open table failed: {e}")))?
        } else {
            let table = self
                .db
                .create_empty_table(name, table_schema(dimensions)?)
                .execute()
                .await
                .map_err(|e| CommonError::VectorDb(format!("create table failed: {e}")))?;
            info!(table = name, dimensions, "vector table created");
            table
        };

        Ok(Arc::new(LanceTable {
            name: name.to_string(),
            dimensions,
            table,
        }))
    }
}

pub struct LanceTable {
    name: String,
    dimensions: usize,
    table: lancedb::Table,
}

#[async_trait]
impl VectorTable for LanceTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn contains(&self, id: &str) -> Result<bool, CommonError> {
        // LanceDB uses DataFusion SQL syntax for filters.
        let filter = format!("id = '{}'", id.replace('\'', "''"));
        let count = self
            .table
            .count_rows(Some(filter))
            .await
            .map_err(|e| CommonError::VectorDb(format!("count by id failed: {e}")))?;
        Ok(count > 0)
    }

    async fn insert(&self, row: VectorRow) -> Result<(), CommonError> {
        let batch = build_record_batch(&row, self.dimensions)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("insert failed: {e}")))?;
        Ok(())
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor>, CommonError> {
        let results = self
            .table
            .vector_search(query)
            .map_err(|e| CommonError::VectorDb(format!("vector search setup failed: {e}")))?
            .limit(limit)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("vector search failed: {e}")))?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| CommonError::VectorDb(format!("collecting search results failed: {e}")))?;

        let mut neighbors = extract_neighbors(&batches);
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn count(&self) -> Result<usize, CommonError> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| CommonError::VectorDb(format!("count failed: {e}")))
    }
}

fn table_schema(dimensions: usize) -> Result<Arc<Schema>, CommonError> {
    let dim = i32::try_from(dimensions)
        .map_err(|_| CommonError::VectorDb(format!("unsupported dimensionality: {dimensions}")))?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
            false,
        ),
    ])))
}

/// Build a single-row Arrow RecordBatch for one vector row.
fn build_record_batch(row: &VectorRow, dimensions: usize) -> Result<RecordBatch, CommonError> {
    if row.embedding.len() != dimensions {
        return Err(CommonError::VectorDb(format!(
            "embedding for {} has {} dimensions, table expects {dimensions}",
            row.id,
            row.embedding.len()
        )));
    }

    let schema = table_schema(dimensions)?;
    let id_array: ArrayRef = Arc::new(StringArray::from(vec![row.id.as_str()]));
    let text_array: ArrayRef = Arc::new(StringArray::from(vec![row.text.as_str()]));

    let values_array = Float32Array::from(row.embedding.clone());
    let embedding_array: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dimensions as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| CommonError::VectorDb(format!("failed to build embedding array: {e}")))?,
    );

    RecordBatch::try_new(schema, vec![id_array, text_array, embedding_array])
        .map_err(|e| CommonError::VectorDb(format!("failed to build record batch: {e}")))
}

/// Expected columns: id (Utf8), text (Utf8), _distance (Float32)
fn extract_neighbors(batches: &[RecordBatch]) -> Vec<Neighbor> {
    let mut neighbors = Vec::new();

    for batch in batches {
        let schema = batch.schema();
        let id_col: Option<&StringArray> = get_string_column(batch, &schema, "id");
        let text_col: Option<&StringArray> = get_string_column(batch, &schema, "text");
        let distance_col: Option<&Float32Array> = get_float_column(batch, &schema, "_distance");

        let (Some(id_col), Some(text_col)) = (id_col, text_col) else {
            warn!("search result batch missing expected columns");
            continue;
        };

        for row in 0..batch.num_rows() {
            neighbors.push(Neighbor {
                id: id_col.value(row).to_string(),
                text: text_col.value(row).to_string(),
                distance: distance_col.map(|c| c.value(row)).unwrap_or(f32::MAX),
            });
        }
    }

    neighbors
}

fn get_string_column<'a>(
    batch: &'a RecordBatch,
    schema: &Schema,
    name: &str,
) -> Option<&'a StringArray> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<StringArray>()
}

fn get_float_column<'a>(
    batch: &'a RecordBatch,
    schema: &Schema,
    name: &str,
) -> Option<&'a Float32Array> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<Float32Array>()
}
