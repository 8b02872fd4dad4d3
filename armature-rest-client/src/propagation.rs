//! Inbound request context for header propagation.
//!
//! A server handling an inbound request runs its downstream calls inside
//! [`scope`]; [`HeaderPropagator`](crate::HeaderPropagator) then copies the
//! selected inbound headers onto outgoing requests made from that task.

use http::HeaderMap;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static INBOUND_HEADERS: Arc<HeaderMap>;
}

/// Run `fut` with `headers` as the inbound request headers.
pub async fn scope<F>(headers: HeaderMap, fut: F) -> F::Output
where
    F: Future,
{
    INBOUND_HEADERS.scope(Arc::new(headers), fut).await
}

/// Inbound headers of the current task, if it runs inside [`scope`].
pub fn current() -> Option<Arc<HeaderMap>> {
    INBOUND_HEADERS.try_with(Arc::clone).ok()
}
