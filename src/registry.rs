//! Dataset registry with snapshot semantics.
//!
//! Readers get `Arc<Dataset>` clones; registration atomically replaces the
//! entry, so a resolution already holding a snapshot keeps operating on it.

use crate::connector::{self, SourceDescriptor};
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::schema::SemanticSchema;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Default)]
pub struct DatasetRegistry {
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and register a dataset. Registering an existing id replaces it.
    pub fn register(
        &self,
        id: &str,
        source: SourceDescriptor,
        description: &str,
        semantic: Option<SemanticSchema>,
    ) -> Result<Arc<Dataset>> {
        let frame = connector::load_dataset(&source)?;
        let dataset = Arc::new(Dataset::new(id, description, frame, semantic)?);

        let mut datasets = self.datasets.write().expect("registry lock poisoned");
        let replaced = datasets.insert(id.to_string(), Arc::clone(&dataset)).is_some();
        info!(
            dataset = id,
            rows = dataset.row_count(),
            replaced,
            "registered dataset"
        );
        Ok(dataset)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Dataset>> {
        self.datasets
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub fn unregister(&self, id: &str) -> Result<()> {
        let removed = self
            .datasets
            .write()
            .expect("registry lock poisoned")
            .remove(id);
        match removed {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    /// Declared semantic schema for a dataset, or an empty one when the
    /// caller registered no declarations.
    pub fn describe(&self, id: &str) -> Result<SemanticSchema> {
        let dataset = self.get(id)?;
        Ok(dataset.semantic.clone().unwrap_or_default())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .datasets
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.read().expect("registry lock poisoned").is_empty()
    }

    /// Snapshot of the requested datasets (or all of them when `ids` is
    /// empty). One resolution works against one snapshot for its lifetime.
    pub fn snapshot(&self, ids: &[&str]) -> Result<Vec<Arc<Dataset>>> {
        let datasets = self.datasets.read().expect("registry lock poisoned");
        if ids.is_empty() {
            let mut all: Vec<Arc<Dataset>> = datasets.values().cloned().collect();
            all.sort_by(|a, b| a.name.cmp(&b.name));
            return Ok(all);
        }
        ids.iter()
            .map(|id| {
                datasets
                    .get(*id)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(id.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn register_frame(registry: &DatasetRegistry, id: &str, frame: DataFrame) -> Arc<Dataset> {
        registry
            .register(id, SourceDescriptor::Frame(frame), "", None)
            .unwrap()
    }

    #[test]
    fn register_replaces_existing_id_atomically() {
        let registry = DatasetRegistry::new();
        let old = register_frame(&registry, "sales", df!["a" => [1]].unwrap());
        let held = registry.get("sales").unwrap();

        register_frame(&registry, "sales", df!["a" => [1, 2, 3]].unwrap());

        // The held snapshot still sees the old content.
        assert_eq!(held.row_count(), old.row_count());
        assert_eq!(registry.get("sales").unwrap().row_count(), 3);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = DatasetRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn snapshot_rejects_unknown_ids() {
        let registry = DatasetRegistry::new();
        register_frame(&registry, "sales", df!["a" => [1]].unwrap());
        assert!(registry.snapshot(&["sales", "missing"]).is_err());
        assert_eq!(registry.snapshot(&[]).unwrap().len(), 1);
    }
}
