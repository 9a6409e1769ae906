//! Index advisor
//!
//! Looks at the read statements of a stored capture, asks the database for
//! their execution plans and proposes indexes for selective sequential
//! scans over large tables. Runs out of band through an [`AdvisorQueue`]
//! backed by a fixed pool of worker tasks.

pub mod advisor;
pub mod inspector;
pub mod pg;
pub mod plan;
pub mod queue;

pub use advisor::{AdvisorConfig, IndexAdvisor};
pub use inspector::PlanInspector;
pub use pg::PgInspector;
pub use plan::PlanNode;
pub use queue::AdvisorQueue;

use std::time::Duration;

use sqlscope_store::StoreError;
use thiserror::Error;

/// Errors produced while analyzing captures
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Failed to retrieve query plan: {0}")]
    Explain(String),

    #[error("Malformed query plan: {0}")]
    MalformedPlan(String),

    #[error("Catalog lookup failed: {0}")]
    Catalog(String),

    #[error("Plan inspection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Capture not found: {0}")]
    CaptureNotFound(String),

    #[error("Advisor queue is full, dropped capture {0}")]
    QueueFull(String),

    #[error("Advisor queue is shut down")]
    QueueClosed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
