//! Request-scoped capture handle
//!
//! The handle is cloned into request extensions and into every
//! [`ProfiledDriver`](crate::ProfiledDriver) serving that request. Only the
//! owning request ever touches it, so the lock is never contended; it exists
//! because the handle is shared between the middleware and the driver.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::model::{RequestCapture, ResponseSnapshot, StatementRecord};

/// Shared handle to the capture of one in-flight request
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    inner: Arc<Mutex<Option<RequestCapture>>>,
}

impl CaptureHandle {
    pub fn new(capture: RequestCapture) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(capture))),
        }
    }

    /// Start a fresh capture for a request
    pub fn start(method: impl Into<String>, request_path: impl Into<String>) -> Self {
        Self::new(RequestCapture::new(method, request_path))
    }

    // A panic while holding the lock cannot leave a half-written record
    // behind, so a poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, Option<RequestCapture>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capture id, `None` once flushed
    pub fn id(&self) -> Option<Uuid> {
        self.lock().as_ref().map(|capture| capture.id)
    }

    /// Append a statement. Returns `false` if the capture was already flushed.
    pub fn append(&self, record: StatementRecord) -> bool {
        match self.lock().as_mut() {
            Some(capture) => {
                capture.push(record);
                true
            }
            None => false,
        }
    }

    /// Record the response status and body snapshot
    pub fn set_response(&self, status_code: u16, snapshot: ResponseSnapshot) {
        if let Some(capture) = self.lock().as_mut() {
            capture.set_response(status_code, snapshot);
        }
    }

    /// Take the capture out for flushing, leaving the handle empty.
    ///
    /// Only the first call returns the capture, which is what guarantees a
    /// capture is persisted at most once.
    pub fn take(&self) -> Option<RequestCapture> {
        self.lock().take()
    }

    pub fn is_flushed(&self) -> bool {
        self.lock().is_none()
    }

    pub fn statement_count(&self) -> usize {
        self.lock()
            .as_ref()
            .map(|capture| capture.statements.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn record(sql: &str) -> StatementRecord {
        StatementRecord {
            sql: sql.to_string(),
            params: serde_json::json!([]),
            execution_time: Utc::now(),
            execution_duration: 0.001,
            is_in_transaction: false,
            db_alias: "default".to_string(),
            rows_affected: Some(1),
            db_vendor: "sqlite".to_string(),
            needs_rollback: false,
            tables: BTreeSet::new(),
            failed: false,
        }
    }

    #[test]
    fn test_take_only_once() {
        let handle = CaptureHandle::start("GET", "/films");
        assert!(handle.append(record("SELECT 1")));

        let capture = handle.take().expect("capture present");
        assert_eq!(capture.statements.len(), 1);
        assert!(handle.take().is_none());
        assert!(handle.is_flushed());
    }

    #[test]
    fn test_append_after_flush_is_dropped() {
        let handle = CaptureHandle::start("GET", "/films");
        handle.take();
        assert!(!handle.append(record("SELECT 1")));
        assert_eq!(handle.statement_count(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = CaptureHandle::start("POST", "/rentals");
        let clone = handle.clone();
        clone.append(record("INSERT INTO rental VALUES (1)"));
        clone.set_response(201, ResponseSnapshot::NotCaptured);

        let capture = handle.take().unwrap();
        assert_eq!(capture.statements.len(), 1);
        assert_eq!(capture.status_code, Some(201));
        assert!(clone.id().is_none());
    }
}
