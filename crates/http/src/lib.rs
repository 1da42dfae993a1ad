//! HTTP transport for upload items, built on `reqwest`.
//!
//! Each session runs as a tokio task that races the request against a
//! cancellation token. File bytes are streamed from memory or disk and
//! reported as progress while the body is written.

mod body;
mod transport;

pub use transport::{HttpSession, HttpTransport, raw_header_block};

/// Errors from the HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("no tokio runtime available")]
    NoRuntime,
}
