//! Statement execution seam
//!
//! [`Driver`] is the single entry point every statement goes through. The
//! profiler wraps it; adapters implement it for a concrete connection type.

use async_trait::async_trait;

use crate::model::Params;

/// Arguments of one statement execution
#[derive(Debug, Clone, Copy)]
pub struct StatementCall<'a> {
    pub sql: &'a str,
    pub params: &'a Params,
}

impl<'a> StatementCall<'a> {
    pub fn new(sql: &'a str, params: &'a Params) -> Self {
        Self { sql, params }
    }
}

/// Connection state observed around a statement execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// An explicit transaction is open on the connection
    pub in_transaction: bool,
    /// Logical database alias
    pub db_alias: String,
    /// Engine identifier ("postgresql", "sqlite", "mysql")
    pub vendor: String,
    /// The connection must be rolled back before it can be used again
    pub needs_rollback: bool,
}

/// A database connection that can execute statements
#[async_trait]
pub trait Driver: Send + Sync {
    type Output: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute one statement
    async fn execute(&self, call: StatementCall<'_>) -> Result<Self::Output, Self::Error>;

    /// Snapshot of the connection state
    fn context(&self) -> ExecutionContext;

    /// Rows affected or returned by a completed execution
    fn rows_affected(&self, output: &Self::Output) -> Option<i64> {
        let _ = output;
        None
    }
}
