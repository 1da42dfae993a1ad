//! Upload state machine for a single file.
//!
//! ```text
//! Idle ──upload()──► Uploading ──load 2xx/304──► Success
//!                       │  ├──load other / error──► Error ─┐
//!                       │  ├──abort + cancel intent──► Cancelled ─┤ upload()
//!                       │  └──abort + pause intent──► Paused ──┘   ▼
//!                       ◄──────────────────────────────────── Uploading
//! ```
//!
//! `cancel()` and `pause()` only record intent and abort the session; the
//! transition happens when the transport reports the abort.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::filters::{build_filter_chain, run_filters};
use crate::headers::{ParsedHeaders, parse_headers};
use crate::payload::build_multipart;
use crate::transport::{
    Transport, TransportEvents, TransportRequest, TransportResponse, TransportSession,
    is_success_status,
};
use crate::{EventEmitter, FileDescriptor, FileHandle, Filter, RequestBody, UploadError, UploadOptions};

/// Raw status flags of an item.
///
/// Kept independent (as callers observe them), though at most one of the
/// terminal flags is set after an attempt completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub ready: bool,
    pub uploading: bool,
    pub uploaded: bool,
    pub success: bool,
    pub cancelled: bool,
    pub error: bool,
    pub paused: bool,
}

impl StatusFlags {
    fn in_flight() -> Self {
        Self {
            ready: true,
            uploading: true,
            ..Self::default()
        }
    }

    /// Summarises the flags as a single state.
    pub fn state(&self) -> TransferState {
        if self.uploading {
            TransferState::Uploading
        } else if self.success {
            TransferState::Success
        } else if self.error {
            TransferState::Error
        } else if self.cancelled {
            TransferState::Cancelled
        } else if self.paused {
            TransferState::Paused
        } else {
            TransferState::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferState {
    Idle,
    Uploading,
    Success,
    Error,
    Cancelled,
    Paused,
}

/// How an upload attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    /// Non-success status or network failure.
    TransportError,
    AbortedAsCancel,
    AbortedAsPause,
}

/// Outcome record delivered on the success, error, cancel and pause streams.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub item: TransferItem,
    pub response: String,
    pub status: u16,
    pub headers: ParsedHeaders,
}

/// Record delivered on the progress stream.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub item: TransferItem,
    /// Percentage of the current request body, 0–100.
    pub progress: u8,
    pub bytes_sent: u64,
}

/// One file's upload lifecycle.
///
/// Cloning yields another handle to the same item.
#[derive(Clone)]
pub struct TransferItem {
    inner: Arc<ItemInner>,
}

struct ItemInner {
    id: Uuid,
    descriptor: FileDescriptor,
    original: FileHandle,
    options: UploadOptions,
    filters: Vec<Filter>,
    transport: Arc<dyn Transport>,
    state: Mutex<ItemState>,
    progress_events: EventEmitter<ProgressEvent>,
    success_events: EventEmitter<TransferEvent>,
    error_events: EventEmitter<TransferEvent>,
    cancel_events: EventEmitter<TransferEvent>,
    pause_events: EventEmitter<TransferEvent>,
}

struct ItemState {
    file: FileHandle,
    flags: StatusFlags,
    progress: u8,
    bytes_sent: u64,
    session: Option<Arc<dyn TransportSession>>,
    /// Incremented per `upload()`; callbacks from older sessions are ignored.
    attempt: u64,
}

impl ItemState {
    fn slice(&mut self, offset: Option<u64>) {
        if let Some(offset) = offset {
            self.bytes_sent = offset.min(self.file.size());
        }
        self.file = self.file.slice_from(self.bytes_sent);
    }

    fn restore(&mut self, original: &FileHandle) {
        self.bytes_sent = 0;
        self.file = original.clone();
    }
}

impl TransferItem {
    /// Wraps `file` under `options`. Nothing is sent until [`upload`](Self::upload).
    pub fn new(file: FileHandle, options: UploadOptions, transport: Arc<dyn Transport>) -> Self {
        let descriptor = FileDescriptor::from(&file);
        let filters = build_filter_chain(&options);
        Self {
            inner: Arc::new(ItemInner {
                id: Uuid::new_v4(),
                descriptor,
                original: file.clone(),
                options,
                filters,
                transport,
                state: Mutex::new(ItemState {
                    file,
                    flags: StatusFlags::default(),
                    progress: 0,
                    bytes_sent: 0,
                    session: None,
                    attempt: 0,
                }),
                progress_events: EventEmitter::new(),
                success_events: EventEmitter::new(),
                error_events: EventEmitter::new(),
                cancel_events: EventEmitter::new(),
                pause_events: EventEmitter::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ItemState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Snapshot of the file as first supplied.
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.inner.descriptor
    }

    pub fn options(&self) -> &UploadOptions {
        &self.inner.options
    }

    pub fn filters(&self) -> &[Filter] {
        &self.inner.filters
    }

    /// The byte range the next attempt will send.
    pub fn file(&self) -> FileHandle {
        self.lock_state().file.clone()
    }

    pub fn original_file(&self) -> &FileHandle {
        &self.inner.original
    }

    pub fn status(&self) -> StatusFlags {
        self.lock_state().flags
    }

    pub fn state(&self) -> TransferState {
        self.status().state()
    }

    pub fn progress(&self) -> u8 {
        self.lock_state().progress
    }

    pub fn bytes_sent(&self) -> u64 {
        self.lock_state().bytes_sent
    }

    pub fn is_ready(&self) -> bool {
        self.status().ready
    }

    pub fn is_uploading(&self) -> bool {
        self.status().uploading
    }

    pub fn is_uploaded(&self) -> bool {
        self.status().uploaded
    }

    pub fn is_success(&self) -> bool {
        self.status().success
    }

    pub fn is_cancelled(&self) -> bool {
        self.status().cancelled
    }

    pub fn is_error(&self) -> bool {
        self.status().error
    }

    pub fn is_paused(&self) -> bool {
        self.status().paused
    }

    pub fn on_progress(&self) -> &EventEmitter<ProgressEvent> {
        &self.inner.progress_events
    }

    pub fn on_success(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.success_events
    }

    pub fn on_error(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.error_events
    }

    pub fn on_cancel(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.cancel_events
    }

    pub fn on_pause(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.pause_events
    }

    /// Runs the filter chain against the file descriptor.
    pub fn validate_file(&self) -> Result<bool, UploadError> {
        let result = run_filters(
            &self.inner.filters,
            &self.inner.descriptor,
            &self.inner.options,
        );
        if let Err(UploadError::Validation { filter }) = &result {
            debug!(item = %self.inner.id, name = %self.inner.descriptor.name, %filter, "file rejected");
        }
        result
    }

    /// Starts (or restarts) an upload attempt from the working file.
    ///
    /// A session left over from an earlier attempt is aborted silently.
    pub fn upload(&self) -> Result<(), UploadError> {
        let file = self.file();
        if file.is_empty() {
            warn!(item = %self.inner.id, name = %file.name(), "refusing to upload empty file");
            return Err(UploadError::InvalidFile);
        }

        // Built before taking the lock: formatters may call back into the item.
        let body = self.build_body(&file);

        let (attempt, stale) = {
            let mut state = self.lock_state();
            state.flags = StatusFlags::in_flight();
            state.attempt += 1;
            (state.attempt, state.session.take())
        };
        if let Some(stale) = stale {
            debug!(item = %self.inner.id, "aborting superseded session");
            stale.abort();
        }

        let options = &self.inner.options;
        let request = TransportRequest {
            method: options.method.clone(),
            url: options.url.clone(),
            headers: options.headers.clone(),
            with_credentials: options.with_credentials,
            body,
        };

        info!(
            item = %self.inner.id,
            name = %file.name(),
            bytes = file.size(),
            attempt,
            url = %options.url,
            "upload started"
        );

        let events = Arc::new(AttemptEvents {
            item: self.clone(),
            attempt,
        });
        let session = self.inner.transport.open(request, events);

        let pending_abort = {
            let mut state = self.lock_state();
            // The transport may already have finished the attempt synchronously.
            if state.attempt != attempt || !state.flags.uploading {
                return Ok(());
            }
            state.session = Some(Arc::clone(&session));
            // cancel() or pause() ran while the session was opening.
            state.flags.cancelled || state.flags.paused
        };
        if pending_abort {
            debug!(item = %self.inner.id, attempt, "abort requested during open");
            session.abort();
        }
        Ok(())
    }

    /// Requests cancellation of the running attempt. No-op when idle.
    pub fn cancel(&self) {
        if let Some(session) = self.request_abort(|flags| flags.cancelled = true) {
            debug!(item = %self.inner.id, "cancel requested");
            session.abort();
        }
    }

    /// Requests a pause of the running attempt. No-op when idle.
    pub fn pause(&self) {
        if let Some(session) = self.request_abort(|flags| flags.paused = true) {
            debug!(item = %self.inner.id, "pause requested");
            session.abort();
        }
    }

    fn request_abort(&self, intent: impl FnOnce(&mut StatusFlags)) -> Option<Arc<dyn TransportSession>> {
        let mut state = self.lock_state();
        if !state.flags.uploading {
            return None;
        }
        intent(&mut state.flags);
        state.session.clone()
    }

    /// Truncates the working file to start at `offset` (default: bytes sent).
    pub fn slice_file(&self, offset: Option<u64>) {
        self.lock_state().slice(offset);
    }

    /// Restores the originally supplied file and zeroes bytes sent.
    pub fn reset_to_original_file(&self) {
        self.lock_state().restore(&self.inner.original);
    }

    fn build_body(&self, file: &FileHandle) -> RequestBody {
        let options = &self.inner.options;
        if options.disable_multipart {
            options.format_data.format(self)
        } else {
            RequestBody::Multipart(build_multipart(file, options))
        }
    }

    fn handle_progress(&self, attempt: u64, loaded: u64, total: u64, length_computable: bool) {
        let event = {
            let mut state = self.lock_state();
            if state.attempt != attempt || !state.flags.uploading {
                return;
            }
            let progress = if length_computable && total > 0 {
                (u128::from(loaded.min(total)) * 100 / u128::from(total)) as u8
            } else {
                0
            };
            state.progress = progress;
            state.bytes_sent = loaded.min(state.file.size());
            ProgressEvent {
                item: self.clone(),
                progress,
                bytes_sent: state.bytes_sent,
            }
        };
        trace!(item = %self.inner.id, progress = event.progress, bytes_sent = event.bytes_sent, "progress");
        self.inner.progress_events.emit(&event);
    }

    fn handle_abort(&self, attempt: u64, response: TransportResponse) {
        let outcome = {
            let state = self.lock_state();
            if state.attempt != attempt {
                return;
            }
            if state.flags.cancelled {
                TransferOutcome::AbortedAsCancel
            } else {
                TransferOutcome::AbortedAsPause
            }
        };
        self.finish(attempt, outcome, response);
    }

    fn finish(&self, attempt: u64, outcome: TransferOutcome, response: TransportResponse) {
        let (bytes_sent, remaining) = {
            let mut state = self.lock_state();
            if state.attempt != attempt || !state.flags.uploading {
                return;
            }
            state.session = None;
            state.flags = StatusFlags::default();
            match outcome {
                TransferOutcome::Success => {
                    state.flags.uploaded = true;
                    state.flags.success = true;
                    state.progress = 100;
                    state.bytes_sent = self.inner.descriptor.size;
                }
                TransferOutcome::TransportError => {
                    state.flags.error = true;
                    state.progress = 0;
                    state.restore(&self.inner.original);
                }
                TransferOutcome::AbortedAsCancel => {
                    state.flags.cancelled = true;
                    state.restore(&self.inner.original);
                }
                TransferOutcome::AbortedAsPause => {
                    state.flags.paused = true;
                    state.slice(None);
                }
            }
            (state.bytes_sent, state.file.size())
        };

        match outcome {
            TransferOutcome::TransportError => warn!(
                item = %self.inner.id,
                status = response.status,
                "upload failed"
            ),
            _ => info!(
                item = %self.inner.id,
                ?outcome,
                status = response.status,
                bytes_sent,
                remaining,
                "upload finished"
            ),
        }

        let event = TransferEvent {
            item: self.clone(),
            headers: parse_headers(&response.raw_headers),
            response: response.body,
            status: response.status,
        };
        let emitter = match outcome {
            TransferOutcome::Success => &self.inner.success_events,
            TransferOutcome::TransportError => &self.inner.error_events,
            TransferOutcome::AbortedAsCancel => &self.inner.cancel_events,
            TransferOutcome::AbortedAsPause => &self.inner.pause_events,
        };
        emitter.emit(&event);
    }
}

impl fmt::Debug for TransferItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferItem")
            .field("id", &self.inner.id)
            .field("name", &self.inner.descriptor.name)
            .field("size", &self.inner.descriptor.size)
            .finish_non_exhaustive()
    }
}

/// Routes transport callbacks of one attempt back to the item.
struct AttemptEvents {
    item: TransferItem,
    attempt: u64,
}

impl TransportEvents for AttemptEvents {
    fn on_progress(&self, loaded: u64, total: u64, length_computable: bool) {
        self.item
            .handle_progress(self.attempt, loaded, total, length_computable);
    }

    fn on_load(&self, response: TransportResponse) {
        let outcome = if is_success_status(response.status) {
            TransferOutcome::Success
        } else {
            TransferOutcome::TransportError
        };
        self.item.finish(self.attempt, outcome, response);
    }

    fn on_error(&self, response: TransportResponse) {
        self.item
            .finish(self.attempt, TransferOutcome::TransportError, response);
    }

    fn on_abort(&self, response: TransportResponse) {
        self.item.handle_abort(self.attempt, response);
    }
}
