//! Declared semantic metadata for a dataset: typed column descriptions,
//! cross-dataset relations, and load-time transformation rules.

use crate::dataset::{ColumnProfile, ColumnType};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub foreign_key: bool,
    /// Alternative names the pre-check entity scan should recognize.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Foreign-key-like link between two datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSchema {
    pub source_dataset: String,
    pub source_column: String,
    pub target_dataset: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransformationRule {
    Rename { column: String, to: String },
    FillNa { column: String, value: String },
    ConvertType { column: String, to: ColumnType },
}

impl TransformationRule {
    pub fn column(&self) -> &str {
        match self {
            TransformationRule::Rename { column, .. }
            | TransformationRule::FillNa { column, .. }
            | TransformationRule::ConvertType { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticSchema {
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub relations: Vec<RelationSchema>,
    #[serde(default)]
    pub transformations: Vec<TransformationRule>,
}

impl SemanticSchema {
    /// Registration-time validation: every column referenced by a relation
    /// or transformation rule must exist in the dataset's inferred profile.
    pub fn validate(&self, dataset_name: &str, profile: &[ColumnProfile]) -> Result<()> {
        let known: HashMap<&str, ()> = profile.iter().map(|c| (c.name.as_str(), ())).collect();

        for column in &self.columns {
            if !known.contains_key(column.name.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "semantic schema for '{}' declares unknown column '{}'",
                    dataset_name, column.name
                )));
            }
        }

        for relation in &self.relations {
            if relation.source_dataset == dataset_name
                && !known.contains_key(relation.source_column.as_str())
            {
                return Err(EngineError::Configuration(format!(
                    "relation references unknown column '{}' in dataset '{}'",
                    relation.source_column, dataset_name
                )));
            }
        }

        for rule in &self.transformations {
            if !known.contains_key(rule.column()) {
                return Err(EngineError::Configuration(format!(
                    "transformation rule targets unknown column '{}' in dataset '{}'",
                    rule.column(),
                    dataset_name
                )));
            }
        }

        Ok(())
    }

    /// All declared aliases, used by the pre-check entity scan.
    pub fn aliases(&self) -> Vec<&str> {
        self.columns
            .iter()
            .flat_map(|c| c.aliases.iter().map(|a| a.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use polars::prelude::*;

    fn schema_with_rule(column: &str) -> SemanticSchema {
        SemanticSchema {
            transformations: vec![TransformationRule::FillNa {
                column: column.to_string(),
                value: "0".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn validation_rejects_unknown_rule_column() {
        let frame = df!["a" => [1, 2]].unwrap();
        let result = Dataset::new("t", "", frame, Some(schema_with_rule("missing")));
        assert!(result.is_err());
    }

    #[test]
    fn validation_accepts_known_columns() {
        let frame = df!["a" => [1, 2]].unwrap();
        assert!(Dataset::new("t", "", frame, Some(schema_with_rule("a"))).is_ok());
    }

    #[test]
    fn validation_rejects_unknown_relation_source() {
        let frame = df!["a" => [1, 2]].unwrap();
        let schema = SemanticSchema {
            relations: vec![RelationSchema {
                source_dataset: "t".to_string(),
                source_column: "missing".to_string(),
                target_dataset: "u".to_string(),
                target_column: "id".to_string(),
            }],
            ..Default::default()
        };
        assert!(Dataset::new("t", "", frame, Some(schema)).is_err());
    }
}
