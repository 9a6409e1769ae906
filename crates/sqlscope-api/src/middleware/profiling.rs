//! Request profiling middleware
//!
//! Opens a [`CaptureHandle`] per request and stores it in the request
//! extensions. Handlers pick it up with `Extension<CaptureHandle>` and wrap
//! their database driver in a `ProfiledDriver`:
//!
//! ```ignore
//! async fn handler(Extension(capture): Extension<CaptureHandle>, State(db): State<DatabaseConnection>) {
//!     let driver = ProfiledDriver::new(SeaOrmDriver::new(db, "default"), capture);
//!     // every statement executed through `driver` is recorded
//! }
//! ```
//!
//! When the handler returns, the response status and a snapshot of small
//! JSON or text bodies are added and the capture is flushed. If the request
//! future is dropped early or the handler panics, a drop guard flushes
//! whatever was captured so far.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::header,
    middleware::{self as axum_middleware, Next},
    response::Response,
    Router,
};
use http_body::{Body as _, Frame};
use sqlscope_core::{CaptureHandle, ResponseSnapshot};
use tracing::{debug, warn};

use crate::profiler::Profiler;

/// Flushes the capture if the request never reached the normal flush
struct FlushGuard {
    profiler: Profiler,
    handle: CaptureHandle,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if self.profiler.flush_detached(&self.handle) {
            debug!("Flushed capture of an interrupted request");
        }
    }
}

/// Body standing in for one that failed while being buffered. It yields the
/// failure, so the server aborts the response instead of sending it empty.
struct FailedBody(Option<axum::Error>);

impl http_body::Body for FailedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        Poll::Ready(self.get_mut().0.take().map(Err))
    }
}

/// Profile every request passing through the router
pub fn instrument<S>(router: Router<S>, profiler: Profiler) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(axum_middleware::from_fn_with_state(profiler, profile_requests))
}

/// Middleware function, for use with `axum::middleware::from_fn_with_state`
pub async fn profile_requests(
    State(profiler): State<Profiler>,
    mut request: Request,
    next: Next,
) -> Response {
    let handle = profiler.begin(request.method().as_str(), request.uri().path());
    request.extensions_mut().insert(handle.clone());

    let guard = FlushGuard {
        profiler: profiler.clone(),
        handle: handle.clone(),
    };

    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let (snapshot, body) =
        snapshot_body(body, content_type.as_deref(), profiler.config().max_body_bytes).await;
    handle.set_response(parts.status.as_u16(), snapshot);

    profiler.flush(&handle).await;
    drop(guard);

    Response::from_parts(parts, body)
}

fn is_snapshot_type(content_type: &str) -> bool {
    content_type.contains("json") || content_type.starts_with("text/")
}

/// Buffer the body when it is small, of known size and of a textual type.
/// Anything else passes through untouched.
async fn snapshot_body(
    body: Body,
    content_type: Option<&str>,
    max_bytes: usize,
) -> (ResponseSnapshot, Body) {
    let Some(content_type) = content_type.filter(|ct| is_snapshot_type(ct)) else {
        return (ResponseSnapshot::NotCaptured, body);
    };

    let fits = body
        .size_hint()
        .exact()
        .and_then(|len| usize::try_from(len).ok())
        .is_some_and(|len| len <= max_bytes);
    if !fits {
        return (ResponseSnapshot::NotCaptured, body);
    }

    match axum::body::to_bytes(body, max_bytes).await {
        Ok(bytes) => (
            ResponseSnapshot::from_bytes(Some(content_type), &bytes),
            Body::from(bytes),
        ),
        Err(e) => {
            warn!("Failed to buffer response body: {}", e);
            (ResponseSnapshot::NotCaptured, Body::new(FailedBody(Some(e))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body::SizeHint;
    use serde_json::json;

    /// Body announcing a length and then failing
    struct BrokenBody;

    impl http_body::Body for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, std::io::Error>>> {
            Poll::Ready(Some(Err(std::io::Error::other("connection reset"))))
        }

        fn size_hint(&self) -> SizeHint {
            SizeHint::with_exact(12)
        }
    }

    #[tokio::test]
    async fn test_json_body_is_snapshotted_and_preserved() {
        let body = Body::from(r#"{"ok":true}"#);
        let (snapshot, body) = snapshot_body(body, Some("application/json"), 1024).await;

        assert_eq!(snapshot, ResponseSnapshot::Json(json!({"ok": true})));
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_large_or_binary_bodies_are_skipped() {
        let (snapshot, body) =
            snapshot_body(Body::from(vec![b'a'; 2048]), Some("text/plain"), 1024).await;
        assert_eq!(snapshot, ResponseSnapshot::NotCaptured);
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), 2048);

        let (snapshot, _) =
            snapshot_body(Body::from(vec![0u8; 8]), Some("application/octet-stream"), 1024).await;
        assert_eq!(snapshot, ResponseSnapshot::NotCaptured);

        let (snapshot, _) = snapshot_body(Body::from("{}"), None, 1024).await;
        assert_eq!(snapshot, ResponseSnapshot::NotCaptured);
    }

    #[tokio::test]
    async fn test_body_failure_is_passed_on() {
        let (snapshot, body) =
            snapshot_body(Body::new(BrokenBody), Some("application/json"), 1024).await;

        assert_eq!(snapshot, ResponseSnapshot::NotCaptured);
        assert!(axum::body::to_bytes(body, usize::MAX).await.is_err());
    }
}
