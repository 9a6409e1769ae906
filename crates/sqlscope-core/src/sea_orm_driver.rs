//! SeaORM connection adapter
//!
//! Lets any SeaORM connection or transaction act as a [`Driver`], so the
//! profiler can sit between application code and the database. Reads go
//! through `query_all`, everything else through `execute`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, DbErr, QueryResult, Statement, Value};
use sqlscope_sql::{rewrite_markers, BindMarker, StatementKind};

use crate::driver::{Driver, ExecutionContext, StatementCall};
use crate::model::{Params, SqlParam};

/// Result of a statement executed through SeaORM
#[derive(Debug)]
pub enum SeaOrmOutput {
    Rows(Vec<QueryResult>),
    Executed { rows_affected: u64 },
}

/// [`Driver`] over a SeaORM connection
pub struct SeaOrmDriver<C> {
    conn: C,
    alias: String,
    in_transaction: bool,
    needs_rollback: AtomicBool,
}

impl<C: ConnectionTrait> SeaOrmDriver<C> {
    /// Wrap a pooled connection
    pub fn new(conn: C, alias: impl Into<String>) -> Self {
        Self {
            conn,
            alias: alias.into(),
            in_transaction: false,
            needs_rollback: AtomicBool::new(false),
        }
    }

    /// Wrap an open transaction
    pub fn in_transaction(conn: C, alias: impl Into<String>) -> Self {
        Self {
            in_transaction: true,
            ..Self::new(conn, alias)
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_connection(self) -> C {
        self.conn
    }
}

/// Engine identifier for a backend
pub fn vendor_name(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Postgres => "postgresql",
        DbBackend::MySql => "mysql",
        DbBackend::Sqlite => "sqlite",
    }
}

/// Bind value for a parameter. NULL has no value: every SeaORM value
/// carries a column type, so NULLs are written into the statement instead.
fn to_value(param: &SqlParam) -> Option<Value> {
    Some(match param {
        SqlParam::Null => return None,
        SqlParam::Bool(b) => Value::from(*b),
        SqlParam::Int(i) => Value::from(*i),
        SqlParam::Float(f) => Value::from(*f),
        SqlParam::Text(s) => Value::from(s.clone()),
        SqlParam::Uuid(u) => Value::from(*u),
        SqlParam::Timestamp(t) => Value::from(*t),
        SqlParam::Bytes(b) => Value::from(b.clone()),
    })
}

/// Statement for `sql` with its positional parameters bound
fn bind(backend: DbBackend, sql: &str, params: &Params) -> Result<Statement, DbErr> {
    let Params::Positional(params) = params else {
        return Err(DbErr::Custom(
            "Named parameters are not supported by the SeaORM driver".to_string(),
        ));
    };

    let values: Vec<Option<Value>> = params.iter().map(to_value).collect();
    if values.iter().all(Option::is_some) {
        return Ok(Statement::from_sql_and_values(
            backend,
            sql,
            values.into_iter().flatten(),
        ));
    }

    // Markers of the remaining values, renumbered for `$n` backends
    let mut numbers = Vec::with_capacity(values.len());
    let mut next = 0;
    for value in &values {
        numbers.push(value.as_ref().map(|_| {
            next += 1;
            next
        }));
    }

    let sql = rewrite_markers(sql, |marker| {
        let index = match &marker {
            BindMarker::Positional(index) => Some(*index),
            BindMarker::Numbered(number) => number.checked_sub(1),
            BindMarker::Named(name) => return format!(":{}", name),
        };
        match (index.and_then(|i| numbers.get(i)), marker) {
            (Some(None), _) => "NULL".to_string(),
            (Some(Some(n)), _) if backend == DbBackend::Postgres => format!("${}", n),
            (Some(Some(_)), _) => "?".to_string(),
            (None, BindMarker::Numbered(number)) => format!("${}", number),
            (None, _) => "?".to_string(),
        }
    });

    Ok(Statement::from_sql_and_values(
        backend,
        sql,
        values.into_iter().flatten(),
    ))
}

#[async_trait]
impl<C: ConnectionTrait + Send + Sync> Driver for SeaOrmDriver<C> {
    type Output = SeaOrmOutput;
    type Error = DbErr;

    async fn execute(&self, call: StatementCall<'_>) -> Result<SeaOrmOutput, DbErr> {
        let backend = self.conn.get_database_backend();
        let statement = bind(backend, call.sql, call.params)?;

        let result = if StatementKind::of(call.sql).is_read() {
            self.conn.query_all(statement).await.map(SeaOrmOutput::Rows)
        } else {
            self.conn
                .execute(statement)
                .await
                .map(|exec| SeaOrmOutput::Executed {
                    rows_affected: exec.rows_affected(),
                })
        };

        if result.is_err() && self.in_transaction {
            self.needs_rollback.store(true, Ordering::Relaxed);
        }

        result
    }

    fn context(&self) -> ExecutionContext {
        ExecutionContext {
            in_transaction: self.in_transaction,
            db_alias: self.alias.clone(),
            vendor: vendor_name(self.conn.get_database_backend()).to_string(),
            needs_rollback: self.needs_rollback.load(Ordering::Relaxed),
        }
    }

    fn rows_affected(&self, output: &SeaOrmOutput) -> Option<i64> {
        match output {
            SeaOrmOutput::Rows(rows) => i64::try_from(rows.len()).ok(),
            SeaOrmOutput::Executed { rows_affected } => i64::try_from(*rows_affected).ok(),
        }
    }
}
