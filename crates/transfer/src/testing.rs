//! In-memory transport for tests.
//!
//! Sessions never touch the network. Tests drive them by hand through
//! [`MockSession::progress`], [`MockSession::respond`] and friends, which
//! invoke the item's callbacks synchronously.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::transport::{
    Transport, TransportEvents, TransportRequest, TransportResponse, TransportSession,
};
use crate::{FormValue, Payload, RequestBody};

/// Records every session it opens.
#[derive(Default)]
pub struct MockTransport {
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Most recent session that carries a file called `name`.
    pub fn session_for(&self, name: &str) -> Option<Arc<MockSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|s| s.file_name.as_deref() == Some(name))
            .cloned()
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        request: TransportRequest,
        events: Arc<dyn TransportEvents>,
    ) -> Arc<dyn TransportSession> {
        let file_name = match &request.body {
            RequestBody::Multipart(form) => form.parts.iter().find_map(|part| match &part.value {
                FormValue::File(file) => Some(file.name().to_string()),
                FormValue::Text(_) => None,
            }),
            RequestBody::Raw(Payload::File(file)) => Some(file.name().to_string()),
            _ => None,
        };
        let session = Arc::new(MockSession {
            method: request.method,
            url: request.url,
            headers: request.headers,
            with_credentials: request.with_credentials,
            file_name,
            body: Mutex::new(Some(request.body)),
            events,
            aborted: AtomicBool::new(false),
            defer_abort: AtomicBool::new(false),
        });
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&session));
        session
    }
}

/// One recorded request. Aborting fires `on_abort` immediately unless
/// [`defer_abort`](Self::defer_abort) was called.
pub struct MockSession {
    method: String,
    url: String,
    headers: BTreeMap<String, String>,
    with_credentials: bool,
    file_name: Option<String>,
    body: Mutex<Option<RequestBody>>,
    events: Arc<dyn TransportEvents>,
    aborted: AtomicBool,
    defer_abort: AtomicBool,
}

impl MockSession {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn with_credentials(&self) -> bool {
        self.with_credentials
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Takes the request body. Returns `None` on the second call.
    pub fn take_body(&self) -> Option<RequestBody> {
        self.body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn progress(&self, loaded: u64, total: u64) {
        self.events.on_progress(loaded, total, true);
    }

    /// Progress without a known total.
    pub fn progress_unknown(&self, loaded: u64) {
        self.events.on_progress(loaded, 0, false);
    }

    pub fn respond(&self, status: u16, body: &str, raw_headers: &str) {
        self.events.on_load(TransportResponse {
            status,
            body: body.to_string(),
            raw_headers: raw_headers.to_string(),
        });
    }

    /// Network failure (status 0).
    pub fn fail(&self) {
        self.events.on_error(TransportResponse::default());
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Holds back `on_abort` until [`fire_abort`](Self::fire_abort).
    pub fn defer_abort(&self) {
        self.defer_abort.store(true, Ordering::SeqCst);
    }

    pub fn fire_abort(&self) {
        self.events.on_abort(TransportResponse::default());
    }
}

impl TransportSession for MockSession {
    fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.defer_abort.load(Ordering::SeqCst) {
            self.events.on_abort(TransportResponse::default());
        }
    }
}
