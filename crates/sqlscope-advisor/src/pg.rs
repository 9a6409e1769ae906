//! PostgreSQL plan inspector

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement};
use serde_json::Value as JsonValue;
use sqlscope_sql::{rewrite_markers, BindMarker};
use tracing::{debug, info};

use crate::inspector::PlanInspector;
use crate::plan::PlanNode;
use crate::AdvisorError;

/// [`PlanInspector`] backed by `EXPLAIN`, `pg_class` and `pg_indexes`
#[derive(Clone)]
pub struct PgInspector {
    db: DatabaseConnection,
}

impl PgInspector {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let db = Database::connect(database_url).await?;
        info!("Index advisor connected to {:?}", db.get_database_backend());
        Ok(Self::new(db))
    }
}

/// Render a captured parameter as an untyped SQL literal, so the planner
/// infers its type from the column it is compared against.
fn to_literal(param: &JsonValue) -> String {
    match param {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(true) => "TRUE".to_string(),
        JsonValue::Bool(false) => "FALSE".to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// `EXPLAIN` text for `sql` with every bind marker replaced by its parameter
fn explain_sql(sql: &str, params: &JsonValue) -> Result<String, AdvisorError> {
    let mut unbound = None;
    let inlined = rewrite_markers(sql, |marker| {
        let param = match (&marker, params) {
            (BindMarker::Positional(index), JsonValue::Array(values)) => values.get(*index),
            (BindMarker::Numbered(number), JsonValue::Array(values)) => {
                number.checked_sub(1).and_then(|index| values.get(index))
            }
            (BindMarker::Named(name), JsonValue::Object(values)) => values.get(name),
            _ => None,
        };
        match param {
            Some(param) => to_literal(param),
            None => {
                unbound.get_or_insert(marker);
                "NULL".to_string()
            }
        }
    });

    if let Some(marker) = unbound {
        return Err(AdvisorError::Explain(format!(
            "no captured parameter for bind marker {:?}",
            marker
        )));
    }

    Ok(format!("EXPLAIN (FORMAT JSON) {}", inlined))
}

#[async_trait]
impl PlanInspector for PgInspector {
    async fn explain(&self, sql: &str, params: &JsonValue) -> Result<PlanNode, AdvisorError> {
        let statement = Statement::from_string(DbBackend::Postgres, explain_sql(sql, params)?);

        let row = self
            .db
            .query_one(statement)
            .await
            .map_err(|e| AdvisorError::Explain(e.to_string()))?
            .ok_or_else(|| AdvisorError::Explain("EXPLAIN returned no rows".to_string()))?;

        let raw = row
            .try_get_by_index::<JsonValue>(0)
            .or_else(|_| row.try_get_by_index::<String>(0).map(JsonValue::String))
            .map_err(|e| AdvisorError::MalformedPlan(e.to_string()))?;

        PlanNode::from_explain(raw)
    }

    async fn table_rows(&self, table: &str) -> Result<f64, AdvisorError> {
        let statement = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT reltuples::float8 AS reltuples FROM pg_class WHERE relname = $1",
            [table.into()],
        );

        let row = self
            .db
            .query_one(statement)
            .await
            .map_err(|e| AdvisorError::Catalog(e.to_string()))?;

        let Some(row) = row else {
            debug!("No pg_class entry for {}", table);
            return Ok(0.0);
        };

        let rows: f64 = row
            .try_get("", "reltuples")
            .map_err(|e| AdvisorError::Catalog(e.to_string()))?;

        // -1 means the table was never analyzed
        Ok(rows.max(0.0))
    }

    async fn index_definitions(&self, table: &str) -> Result<Vec<String>, AdvisorError> {
        let statement = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT indexdef FROM pg_indexes WHERE tablename = $1",
            [table.into()],
        );

        let rows = self
            .db
            .query_all(statement)
            .await
            .map_err(|e| AdvisorError::Catalog(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String>("", "indexdef")
                    .map_err(|e| AdvisorError::Catalog(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_are_inlined_as_untyped_literals() {
        let sql = explain_sql(
            "SELECT * FROM rental WHERE customer_uuid = $1 AND rental_date > $2 AND staff_id = $3 AND return_date IS $4",
            &json!(["7f1c2b1e-5d8a-4a8e-9a57-0c7b8d1e2f3a", "2025-03-01T12:00:00Z", 2, null]),
        )
        .unwrap();

        assert_eq!(
            sql,
            "EXPLAIN (FORMAT JSON) SELECT * FROM rental WHERE customer_uuid = '7f1c2b1e-5d8a-4a8e-9a57-0c7b8d1e2f3a' \
             AND rental_date > '2025-03-01T12:00:00Z' AND staff_id = 2 AND return_date IS NULL"
        );
    }

    #[test]
    fn test_quotes_in_text_params_are_escaped() {
        let sql = explain_sql(
            "SELECT * FROM customer WHERE last_name = %s AND active = %s",
            &json!(["O'Brien", true]),
        )
        .unwrap();

        assert!(sql.ends_with("last_name = 'O''Brien' AND active = TRUE"));
    }

    #[test]
    fn test_named_params_are_inlined_by_name() {
        let sql = explain_sql(
            "SELECT * FROM film WHERE title = :title AND rating = %(rating)s",
            &json!({"rating": "PG", "title": "Alien"}),
        )
        .unwrap();

        assert!(sql.ends_with("title = 'Alien' AND rating = 'PG'"));
    }

    #[test]
    fn test_missing_params_are_rejected() {
        assert!(explain_sql("SELECT * FROM film WHERE film_id = $2", &json!([1])).is_err());
        assert!(explain_sql("SELECT * FROM film WHERE film_id = ?", &JsonValue::Null).is_err());
        assert_eq!(
            explain_sql("SELECT 1", &JsonValue::Null).unwrap(),
            "EXPLAIN (FORMAT JSON) SELECT 1"
        );
    }
}
