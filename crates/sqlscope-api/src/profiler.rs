//! Capture flush pipeline
//!
//! At the end of a request the capture is taken out of its handle, run
//! through the N+1 detector, written to the store and optionally queued for
//! the index advisor. Taking the capture empties the handle, so a capture is
//! flushed at most once no matter how many paths try.

use std::str::FromStr;
use std::sync::Arc;

use sqlscope_advisor::AdvisorQueue;
use sqlscope_core::{annotate, CaptureHandle, RelationCatalog, RequestCapture};
use sqlscope_store::{CaptureRecorder, RecordOutcome};
use tracing::{debug, error, warn};

/// How the capture write relates to the response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistMode {
    /// Write before the response is released
    #[default]
    Blocking,
    /// Spawn the write and release the response immediately. Captures still
    /// in flight are lost if the process dies.
    Background,
}

impl FromStr for PersistMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" => Ok(PersistMode::Blocking),
            "background" => Ok(PersistMode::Background),
            other => Err(format!(
                "Invalid persist mode '{}' (expected 'blocking' or 'background')",
                other
            )),
        }
    }
}

/// Profiler configuration
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    pub persist_mode: PersistMode,
    /// Largest response body kept as a snapshot
    pub max_body_bytes: usize,
    /// Queue every recorded capture for the index advisor
    pub analyze_after_record: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            persist_mode: PersistMode::Blocking,
            max_body_bytes: 64 * 1024,
            analyze_after_record: true,
        }
    }
}

/// Request profiler shared by the middleware
#[derive(Clone)]
pub struct Profiler {
    recorder: Arc<dyn CaptureRecorder>,
    catalog: Arc<dyn RelationCatalog>,
    advisor: Option<AdvisorQueue>,
    config: ProfilerConfig,
}

impl Profiler {
    pub fn new(
        recorder: Arc<dyn CaptureRecorder>,
        catalog: Arc<dyn RelationCatalog>,
        config: ProfilerConfig,
    ) -> Self {
        Self {
            recorder,
            catalog,
            advisor: None,
            config,
        }
    }

    /// Send recorded captures to the index advisor
    pub fn with_advisor(mut self, advisor: AdvisorQueue) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Open a capture for a new request
    pub fn begin(&self, method: &str, request_path: &str) -> CaptureHandle {
        CaptureHandle::start(method, request_path)
    }

    /// Flush a finished request. Returns `false` if the capture was already
    /// flushed.
    ///
    /// The write runs on its own task in both modes, so a caller dropped while
    /// waiting on a blocking flush does not lose the capture.
    pub async fn flush(&self, handle: &CaptureHandle) -> bool {
        let Some(capture) = handle.take() else {
            return false;
        };

        let profiler = self.clone();
        let write = tokio::spawn(async move { profiler.persist(capture).await });

        if self.config.persist_mode == PersistMode::Blocking {
            if let Err(e) = write.await {
                error!("Capture write task failed: {}", e);
            }
        }

        true
    }

    /// Flush from a synchronous context such as a drop guard. The write is
    /// always spawned.
    pub fn flush_detached(&self, handle: &CaptureHandle) -> bool {
        let Some(capture) = handle.take() else {
            return false;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let profiler = self.clone();
                runtime.spawn(async move { profiler.persist(capture).await });
                true
            }
            Err(_) => {
                error!(
                    "No runtime available, dropping capture {} for {}",
                    capture.id, capture.request_path
                );
                false
            }
        }
    }

    async fn persist(&self, mut capture: RequestCapture) {
        if let Some(finding) = annotate(&mut capture, self.catalog.as_ref()) {
            debug!("{} {}: {}", capture.method, capture.request_path, finding);
        }

        match self.recorder.record(&capture).await {
            Ok(RecordOutcome::Inserted) => {
                if self.config.analyze_after_record {
                    if let Some(advisor) = &self.advisor {
                        if let Err(e) = advisor.enqueue(capture.id.to_string()) {
                            debug!("Capture {} not queued for analysis: {}", capture.id, e);
                        }
                    }
                }
            }
            Ok(RecordOutcome::AlreadyRecorded) => {
                warn!("Capture {} was already recorded", capture.id);
            }
            Err(e) => {
                error!(
                    "Failed to persist capture {} for {} {}: {}",
                    capture.id, capture.method, capture.request_path, e
                );
            }
        }
    }
}
