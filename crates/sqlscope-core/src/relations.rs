//! Domain relationship metadata
//!
//! The N+1 detector needs to know which tables point at which. A
//! [`RelationCatalog`] answers that per table; [`StaticRelations`] is a
//! map built in code or loaded from JSON:
//!
//! ```json
//! {
//!   "rental": { "belongs_to": [{ "field": "customer", "target": "customer" }] },
//!   "store":  { "has_many":   [{ "field": "staff", "target": "staff" }] }
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One declared relation from a table to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    /// Field name on the owning model
    pub field: String,
    /// Table the relation points at
    pub target: String,
}

/// Relations declared on one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRelations {
    /// One-to-one and many-to-one edges
    #[serde(default)]
    pub belongs_to: Vec<RelationEdge>,
    /// One-to-many and many-to-many edges
    #[serde(default)]
    pub has_many: Vec<RelationEdge>,
}

/// Source of relationship metadata
pub trait RelationCatalog: Send + Sync {
    fn relations(&self, table: &str) -> TableRelations;
}

/// In-memory relation catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticRelations {
    tables: HashMap<String, TableRelations>,
}

impl StaticRelations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a one-to-one or many-to-one relation
    pub fn belongs_to(mut self, table: &str, field: &str, target: &str) -> Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .belongs_to
            .push(RelationEdge {
                field: field.to_string(),
                target: target.to_string(),
            });
        self
    }

    /// Declare a one-to-many or many-to-many relation
    pub fn has_many(mut self, table: &str, field: &str, target: &str) -> Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .has_many
            .push(RelationEdge {
                field: field.to_string(),
                target: target.to_string(),
            });
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl RelationCatalog for StaticRelations {
    fn relations(&self, table: &str) -> TableRelations {
        self.tables.get(table).cloned().unwrap_or_default()
    }
}
