//! Single-file upload state machine.
//!
//! A [`TransferItem`] wraps one file on its way to an HTTP endpoint:
//! policy filters, request body construction (multipart or formatted raw
//! payload), progress tracking, and pause/resume by byte-offset slicing.
//! The network side is abstracted behind the [`Transport`] trait so the
//! state machine stays testable and client-agnostic.

mod events;
mod file;
mod filters;
mod headers;
mod item;
pub mod mime_class;
mod options;
mod payload;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use events::{EventEmitter, Subscription};
pub use file::{FileDescriptor, FileHandle, FileSource};
pub use filters::{
    FILE_SIZE_FILTER, FILE_TYPE_FILTER, Filter, FilterFn, MIME_TYPE_FILTER, build_filter_chain,
    run_filters,
};
pub use headers::{ParsedHeaders, parse_headers};
pub use item::{
    ProgressEvent, StatusFlags, TransferEvent, TransferItem, TransferOutcome, TransferState,
};
pub use options::{AsyncFormatFn, FormatFn, PayloadFormatter, UploadOptions};
pub use payload::{
    FILE_NAME_PLACEHOLDER, FormPart, FormValue, MultipartForm, Payload, PendingPayload,
    RequestBody, build_multipart,
};
pub use transport::{
    Transport, TransportEvents, TransportRequest, TransportResponse, TransportSession,
    is_success_status,
};

/// Errors raised synchronously by upload operations.
///
/// Transport outcomes (HTTP failures, aborts) are never raised; they are
/// delivered through the item's event streams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("file rejected by filter: {filter}")]
    Validation { filter: String },

    #[error("the file specified is no longer valid")]
    InvalidFile,
}
