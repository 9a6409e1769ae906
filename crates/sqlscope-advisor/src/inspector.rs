//! Database collaborator used by the advisor

use async_trait::async_trait;
use serde_json::Value;

use crate::plan::PlanNode;
use crate::AdvisorError;

/// Plan and catalog access for the index advisor
#[async_trait]
pub trait PlanInspector: Send + Sync {
    /// Execution plan for `sql` with its captured parameters
    async fn explain(&self, sql: &str, params: &Value) -> Result<PlanNode, AdvisorError>;

    /// Approximate row count from the catalog statistics
    async fn table_rows(&self, table: &str) -> Result<f64, AdvisorError>;

    /// Raw index definitions of a table
    async fn index_definitions(&self, table: &str) -> Result<Vec<String>, AdvisorError>;
}
