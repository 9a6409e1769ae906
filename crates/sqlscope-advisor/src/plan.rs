//! Typed execution plan tree
//!
//! PostgreSQL returns `EXPLAIN (FORMAT JSON)` output as a one-element array
//! wrapping `{"Plan": {...}}`. Depending on the driver the column arrives as
//! text or as decoded JSON; [`PlanNode::from_explain`] accepts both and
//! nothing past it sees the raw shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AdvisorError;

const SEQ_SCAN: &str = "Seq Scan";

/// One node of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(rename = "Node Type")]
    pub node_type: String,

    #[serde(rename = "Relation Name", default)]
    pub relation_name: Option<String>,

    /// Planner estimate of rows produced by this node
    #[serde(rename = "Plan Rows", default)]
    pub plan_rows: f64,

    #[serde(rename = "Plans", default)]
    pub plans: Vec<PlanNode>,
}

#[derive(Deserialize)]
struct ExplainEntry {
    #[serde(rename = "Plan")]
    plan: PlanNode,
}

impl PlanNode {
    /// Normalize raw EXPLAIN output into the root plan node.
    pub fn from_explain(raw: Value) -> Result<Self, AdvisorError> {
        let value = match raw {
            Value::String(text) => serde_json::from_str(&text)
                .map_err(|e| AdvisorError::MalformedPlan(e.to_string()))?,
            other => other,
        };

        let entry = match value {
            Value::Array(mut entries) => {
                if entries.is_empty() {
                    return Err(AdvisorError::MalformedPlan("empty plan".to_string()));
                }
                entries.swap_remove(0)
            }
            other => other,
        };

        serde_json::from_value::<ExplainEntry>(entry)
            .map(|entry| entry.plan)
            .map_err(|e| AdvisorError::MalformedPlan(e.to_string()))
    }

    pub fn is_seq_scan(&self) -> bool {
        self.node_type == SEQ_SCAN
    }

    /// Every sequential scan node in the tree, depth first
    pub fn seq_scans(&self) -> Vec<&PlanNode> {
        let mut nodes = Vec::new();
        self.collect_seq_scans(&mut nodes);
        nodes
    }

    fn collect_seq_scans<'a>(&'a self, out: &mut Vec<&'a PlanNode>) {
        if self.is_seq_scan() {
            out.push(self);
        }
        for child in &self.plans {
            child.collect_seq_scans(out);
        }
    }
}
