/// In-process vector store.
///
/// Same contract as the LanceDB tables: one row per id, nearest-first results by squared
/// L2 distance (LanceDB's default metric). Ties keep insertion order. Nothing is
/// persisted; the catalog lives as long as the process.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::CommonError;
use crate::vectordb::{Neighbor, VectorCatalog, VectorRow, VectorTable};

#[derive(Default)]
pub struct MemoryVectorDb {
    tables: Mutex<HashMap<String, Arc<MemoryTable>>>,
}

impl MemoryVectorDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorCatalog for MemoryVectorDb {
    async fn open_or_create(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<Arc<dyn VectorTable>, CommonError> {
        let mut tables = self.tables.lock().await;
        let table = tables
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryTable {
                    name: name.to_string(),
                    dimensions,
                    rows: Mutex::new(Vec::new()),
                })
            })
            .clone();

        if table.dimensions != dimensions {
            return Err(CommonError::VectorDb(format!(
                "table {name} holds {}-dimensional vectors, requested {dimensions}",
                table.dimensions
            )));
        }
        Ok(table as Arc<dyn VectorTable>)
    }
}

pub struct MemoryTable {
    name: String,
    dimensions: usize,
    rows: Mutex<Vec<VectorRow>>,
}

#[async_trait]
impl VectorTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn contains(&self, id: &str) -> Result<bool, CommonError> {
        Ok(self.rows.lock().await.iter().any(|r| r.id == id))
    }

    async fn insert(&self, row: VectorRow) -> Result<(), CommonError> {
        if row.embedding.len() != self.dimensions {
            return Err(CommonError::VectorDb(format!(
                "embedding for {} has {} dimensions, table expects {}",
                row.id,
                row.embedding.len(),
                self.dimensions
            )));
        }
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|r| r.id == row.id) {
            return Err(CommonError::VectorDb(format!("duplicate id: {}", row.id)));
        }
        rows.push(row);
        Ok(())
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor>, CommonError> {
        if query.len() != self.dimensions {
            return Err(CommonError::VectorDb(format!(
                "query has {} dimensions, table expects {}",
                query.len(),
                self.dimensions
            )));
        }
        let rows = self.rows.lock().await;
        let mut neighbors: Vec<Neighbor> = rows
            .iter()
            .map(|r| Neighbor {
                id: r.id.clone(),
                text: r.text.clone(),
                distance: squared_l2(query, &r.embedding),
            })
            .collect();
        // stable: equal distances stay in insertion order
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn count(&self) -> Result<usize, CommonError> {
        Ok(self.rows.lock().await.len())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
