//! Index suggestion analysis
//!
//! For every read statement of a capture that touches exactly one table the
//! advisor fetches an execution plan and looks for sequential scans. A scan
//! is worth an index when all of these hold:
//!
//! - the table is large (`large_table_rows`)
//! - the scan is selective (`max_selectivity`)
//! - the statement was slow when captured (`slow_statement_secs`)
//!
//! The filter, join, order and group columns of the statement that no
//! existing index covers become the suggested composite index. Each
//! statement yields at most one suggestion.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlscope_core::{IndexSuggestion, StatementRecord};
use sqlscope_sql::{filter_columns, parse_index_columns};
use sqlscope_store::QueryStore;
use tracing::{debug, info, warn};

use crate::inspector::PlanInspector;
use crate::AdvisorError;

/// Advisor thresholds and pool sizing
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Tables with more rows than this are considered large
    pub large_table_rows: f64,
    /// Estimated rows / total rows must be below this
    pub max_selectivity: f64,
    /// Captured statement duration in seconds must exceed this
    pub slow_statement_secs: f64,
    /// Limit for each plan or catalog call
    pub plan_timeout: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            large_table_rows: 100_000.0,
            max_selectivity: 0.01,
            slow_statement_secs: 0.01,
            plan_timeout: Duration::from_secs(5),
            workers: 2,
            queue_capacity: 256,
        }
    }
}

/// Analyzes stored captures and attaches index suggestions to them
pub struct IndexAdvisor {
    inspector: Arc<dyn PlanInspector>,
    store: QueryStore,
    config: AdvisorConfig,
}

impl IndexAdvisor {
    pub fn new(inspector: Arc<dyn PlanInspector>, store: QueryStore, config: AdvisorConfig) -> Self {
        Self {
            inspector,
            store,
            config,
        }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Analyze one stored capture and persist the result on it.
    pub async fn analyze_capture(&self, id: &str) -> Result<Vec<IndexSuggestion>, AdvisorError> {
        let capture = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AdvisorError::CaptureNotFound(id.to_string()))?;

        let suggestions = self.analyze_statements(&capture.statements).await;
        self.store.attach_index_suggestions(id, &suggestions).await?;

        if suggestions.is_empty() {
            debug!("No index suggestions for capture {}", id);
        } else {
            info!(
                "Capture {} ({}): {} index suggestion(s)",
                id,
                capture.request_path,
                suggestions.len()
            );
        }

        Ok(suggestions)
    }

    /// Suggestions for a list of statements. Statements that fail to
    /// analyze are logged and skipped.
    pub async fn analyze_statements(&self, statements: &[StatementRecord]) -> Vec<IndexSuggestion> {
        let mut suggestions = Vec::new();

        for statement in statements.iter().filter(|s| is_candidate(s)) {
            match self.analyze_statement(statement).await {
                Ok(Some(suggestion)) => {
                    debug!("Suggested {} for: {}", suggestion, statement.sql);
                    suggestions.push(suggestion);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping statement analysis ({}): {}", e, statement.sql),
            }
        }

        suggestions
    }

    /// Analyze a single statement.
    pub async fn analyze_statement(
        &self,
        statement: &StatementRecord,
    ) -> Result<Option<IndexSuggestion>, AdvisorError> {
        let Some(statement_table) = statement.tables.iter().next() else {
            return Ok(None);
        };

        let plan = self
            .bounded(self.inspector.explain(&statement.sql, &statement.params))
            .await?;

        for node in plan.seq_scans() {
            let table = node
                .relation_name
                .clone()
                .unwrap_or_else(|| statement_table.clone());

            let total_rows = self.bounded(self.inspector.table_rows(&table)).await?;
            let selectivity = if total_rows > 0.0 {
                node.plan_rows / total_rows
            } else {
                1.0
            };

            debug!(
                "Seq scan on {}: total rows {}, estimated rows {}, selectivity {}",
                table, total_rows, node.plan_rows, selectivity
            );

            if !(total_rows > self.config.large_table_rows
                && selectivity < self.config.max_selectivity
                && statement.execution_duration > self.config.slow_statement_secs)
            {
                continue;
            }

            let columns = match filter_columns(&statement.sql) {
                Ok(columns) => columns,
                Err(e) => {
                    debug!("Cannot extract filter columns: {}", e);
                    return Ok(None);
                }
            };
            if columns.is_empty() {
                continue;
            }

            let definitions = self
                .bounded(self.inspector.index_definitions(&table))
                .await?;
            let covered: BTreeSet<String> = definitions
                .iter()
                .flat_map(|definition| parse_index_columns(definition))
                .collect();

            let missing: Vec<String> = columns
                .into_iter()
                .filter(|column| !covered.contains(&column.to_lowercase()))
                .collect();
            if missing.is_empty() {
                continue;
            }

            return Ok(Some(IndexSuggestion {
                rationale: format!(
                    "Sequential scan on {} reads ~{:.0} rows to return ~{:.0} (selectivity {:.4}); statement took {:.3}s",
                    table, total_rows, node.plan_rows, selectivity, statement.execution_duration
                ),
                table,
                columns: missing,
            }));
        }

        Ok(None)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, AdvisorError>>,
    ) -> Result<T, AdvisorError> {
        let limit = self.config.plan_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| AdvisorError::Timeout(limit))?
    }
}

fn is_candidate(statement: &StatementRecord) -> bool {
    statement.is_read() && !statement.failed && statement.tables.len() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanNode;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};
    use sqlscope_store::{connect, migrate};

    struct FakeInspector {
        plan_rows: f64,
        table_rows: f64,
        indexes: Vec<String>,
        fail_on: Option<&'static str>,
        delay: Duration,
    }

    impl FakeInspector {
        fn new(plan_rows: f64, table_rows: f64) -> Self {
            Self {
                plan_rows,
                table_rows,
                indexes: vec!["CREATE UNIQUE INDEX payment_pkey ON public.payment USING btree (payment_id)".to_string()],
                fail_on: None,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PlanInspector for FakeInspector {
        async fn explain(&self, sql: &str, _params: &Value) -> Result<PlanNode, AdvisorError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(marker) = self.fail_on {
                if sql.contains(marker) {
                    return Err(AdvisorError::Explain("relation does not exist".to_string()));
                }
            }
            let table = sqlscope_sql::extract_tables(sql)
                .into_iter()
                .next()
                .unwrap_or_default();
            PlanNode::from_explain(json!([{
                "Plan": {"Node Type": "Seq Scan", "Relation Name": table, "Plan Rows": self.plan_rows}
            }]))
        }

        async fn table_rows(&self, _table: &str) -> Result<f64, AdvisorError> {
            Ok(self.table_rows)
        }

        async fn index_definitions(&self, _table: &str) -> Result<Vec<String>, AdvisorError> {
            Ok(self.indexes.clone())
        }
    }

    fn statement(sql: &str, duration: f64) -> StatementRecord {
        StatementRecord {
            sql: sql.to_string(),
            params: json!([]),
            execution_time: Utc::now(),
            execution_duration: duration,
            is_in_transaction: false,
            db_alias: "default".to_string(),
            rows_affected: Some(1),
            db_vendor: "postgresql".to_string(),
            needs_rollback: false,
            tables: sqlscope_sql::extract_tables(sql),
            failed: false,
        }
    }

    async fn advisor(inspector: FakeInspector, config: AdvisorConfig) -> IndexAdvisor {
        let db = connect("sqlite::memory:").await.expect("connect");
        migrate(&db).await.expect("migrate");
        IndexAdvisor::new(Arc::new(inspector), QueryStore::new(db), config)
    }

    const SLOW_LOOKUP: &str = "SELECT * FROM payment WHERE customer_id = 42 ORDER BY payment_date";

    #[tokio::test]
    async fn test_suggests_missing_columns() {
        let advisor = advisor(FakeInspector::new(30.0, 1_600_000.0), AdvisorConfig::default()).await;

        let suggestions = advisor
            .analyze_statements(&[statement(SLOW_LOOKUP, 0.25)])
            .await;

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].table, "payment");
        assert_eq!(
            suggestions[0].columns,
            vec!["customer_id".to_string(), "payment_date".to_string()]
        );
        assert_eq!(
            suggestions[0].to_string(),
            "CREATE INDEX ON payment(customer_id, payment_date)"
        );
    }

    #[tokio::test]
    async fn test_no_suggestion_when_columns_are_indexed() {
        let mut inspector = FakeInspector::new(30.0, 1_600_000.0);
        inspector.indexes.push(
            "CREATE INDEX idx_payment_customer ON public.payment USING btree (customer_id, payment_date)"
                .to_string(),
        );
        let advisor = advisor(inspector, AdvisorConfig::default()).await;

        let suggestions = advisor
            .analyze_statements(&[statement(SLOW_LOOKUP, 0.25)])
            .await;
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_thresholds_must_all_hold() {
        // small table
        let small = advisor(FakeInspector::new(1.0, 5_000.0), AdvisorConfig::default()).await;
        assert!(small
            .analyze_statements(&[statement(SLOW_LOOKUP, 0.25)])
            .await
            .is_empty());

        // not selective
        let broad = advisor(FakeInspector::new(800_000.0, 1_600_000.0), AdvisorConfig::default()).await;
        assert!(broad
            .analyze_statements(&[statement(SLOW_LOOKUP, 0.25)])
            .await
            .is_empty());

        // fast statement
        let fast = advisor(FakeInspector::new(30.0, 1_600_000.0), AdvisorConfig::default()).await;
        assert!(fast
            .analyze_statements(&[statement(SLOW_LOOKUP, 0.001)])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_non_candidates_are_skipped() {
        let advisor = advisor(FakeInspector::new(30.0, 1_600_000.0), AdvisorConfig::default()).await;

        let statements = vec![
            statement("UPDATE payment SET amount = 1 WHERE customer_id = 42", 0.5),
            statement(
                "SELECT * FROM payment p JOIN customer c ON c.customer_id = p.customer_id WHERE c.email = 'x'",
                0.5,
            ),
        ];
        assert!(advisor.analyze_statements(&statements).await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_statement_does_not_abort_others() {
        let mut inspector = FakeInspector::new(30.0, 1_600_000.0);
        inspector.fail_on = Some("rental");
        let advisor = advisor(inspector, AdvisorConfig::default()).await;

        let statements = vec![
            statement("SELECT * FROM rental WHERE staff_id = 1", 0.5),
            statement(SLOW_LOOKUP, 0.5),
        ];

        let suggestions = advisor.analyze_statements(&statements).await;
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].table, "payment");
    }

    #[tokio::test]
    async fn test_plan_timeout_skips_statement() {
        let mut inspector = FakeInspector::new(30.0, 1_600_000.0);
        inspector.delay = Duration::from_millis(200);
        let config = AdvisorConfig {
            plan_timeout: Duration::from_millis(10),
            ..AdvisorConfig::default()
        };
        let advisor = advisor(inspector, config).await;

        let result = advisor.analyze_statement(&statement(SLOW_LOOKUP, 0.5)).await;
        assert!(matches!(result, Err(AdvisorError::Timeout(_))));
        assert!(advisor
            .analyze_statements(&[statement(SLOW_LOOKUP, 0.5)])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_capture() {
        let advisor = advisor(FakeInspector::new(30.0, 1_600_000.0), AdvisorConfig::default()).await;
        let result = advisor.analyze_capture("missing").await;
        assert!(matches!(result, Err(AdvisorError::CaptureNotFound(_))));
    }
}
