//! Transport capability used by [`TransferItem`](crate::TransferItem).
//!
//! A transport issues one request per session and reports back through
//! [`TransportEvents`]: any number of progress callbacks followed by exactly
//! one of load, error, or abort. Any HTTP client that honors this contract
//! is interchangeable.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::RequestBody;

/// Everything a transport needs to issue an upload request.
#[derive(Debug)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub with_credentials: bool,
    pub body: RequestBody,
}

/// What the server (or the lack of one) answered.
///
/// `status` is 0 when no HTTP response was received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    /// Raw header block, one `name: value` per line.
    pub raw_headers: String,
}

/// Callbacks a transport session fires. Implementations must be cheap and
/// must not block.
pub trait TransportEvents: Send + Sync {
    /// Upload progress. `total` is meaningful only if `length_computable`.
    fn on_progress(&self, loaded: u64, total: u64, length_computable: bool);

    /// A response was received, whatever its status.
    fn on_load(&self, response: TransportResponse);

    /// Network-level failure.
    fn on_error(&self, response: TransportResponse);

    /// The session was aborted through [`TransportSession::abort`].
    fn on_abort(&self, response: TransportResponse);
}

/// Handle to one in-flight request.
pub trait TransportSession: Send + Sync {
    /// Requests abortion. `on_abort` fires once the request is torn down,
    /// possibly before this call returns.
    fn abort(&self);
}

/// Opens upload sessions.
pub trait Transport: Send + Sync {
    fn open(
        &self,
        request: TransportRequest,
        events: Arc<dyn TransportEvents>,
    ) -> Arc<dyn TransportSession>;
}

/// 2xx and 304 count as success.
pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status) || status == 304
}
