//! Observing driver decorator
//!
//! [`ProfiledDriver`] forwards every call to the wrapped driver untouched
//! and appends a [`StatementRecord`] to the request's capture afterwards,
//! whether the call succeeded or failed. Building the record can never
//! replace the driver's result: a panic while recording is caught and
//! logged, and the original result is returned as-is.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlscope_sql::extract_tables;
use tracing::{debug, warn};

use crate::capture::CaptureHandle;
use crate::driver::{Driver, ExecutionContext, StatementCall};
use crate::model::StatementRecord;

/// Driver wrapper recording every statement into a capture
pub struct ProfiledDriver<D> {
    inner: D,
    capture: CaptureHandle,
}

impl<D: Driver> ProfiledDriver<D> {
    pub fn new(inner: D, capture: CaptureHandle) -> Self {
        Self { inner, capture }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn capture(&self) -> &CaptureHandle {
        &self.capture
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    fn observe(
        &self,
        call: StatementCall<'_>,
        execution_time: DateTime<Utc>,
        elapsed: Duration,
        rows_affected: Option<i64>,
        failed: bool,
    ) {
        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            build_record(
                call,
                execution_time,
                elapsed,
                rows_affected,
                failed,
                self.inner.context(),
            )
        }));

        match built {
            Ok(record) => {
                if !self.capture.append(record) {
                    debug!("Capture already flushed, statement not recorded");
                }
            }
            Err(_) => warn!("Failed to record statement: {}", call.sql),
        }
    }
}

fn build_record(
    call: StatementCall<'_>,
    execution_time: DateTime<Utc>,
    elapsed: Duration,
    rows_affected: Option<i64>,
    failed: bool,
    context: ExecutionContext,
) -> StatementRecord {
    StatementRecord {
        sql: call.sql.to_string(),
        params: call.params.to_json(),
        execution_time,
        execution_duration: elapsed.as_secs_f64(),
        is_in_transaction: context.in_transaction,
        db_alias: context.db_alias,
        rows_affected,
        db_vendor: context.vendor,
        needs_rollback: context.needs_rollback,
        tables: extract_tables(call.sql),
        failed,
    }
}

#[async_trait]
impl<D: Driver> Driver for ProfiledDriver<D> {
    type Output = D::Output;
    type Error = D::Error;

    async fn execute(&self, call: StatementCall<'_>) -> Result<Self::Output, Self::Error> {
        let execution_time = Utc::now();
        let started = Instant::now();

        let result = self.inner.execute(call).await;

        let elapsed = started.elapsed();
        let rows_affected = match &result {
            Ok(output) => self.inner.rows_affected(output),
            Err(_) => None,
        };
        self.observe(call, execution_time, elapsed, rows_affected, result.is_err());

        result
    }

    fn context(&self) -> ExecutionContext {
        self.inner.context()
    }

    fn rows_affected(&self, output: &Self::Output) -> Option<i64> {
        self.inner.rows_affected(output)
    }
}
