use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::TryStreamExt;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;
use upqueue_transfer::{FileHandle, FormValue, MultipartForm, Payload, TransportEvents};

use crate::Error;

/// Read buffer size for streamed file bodies.
const CHUNK_SIZE: usize = 64 * 1024;

/// Counts file bytes handed to the connection and reports them.
struct ProgressCounter {
    events: Arc<dyn TransportEvents>,
    loaded: AtomicU64,
    total: u64,
}

impl ProgressCounter {
    fn new(events: Arc<dyn TransportEvents>, total: u64) -> Arc<Self> {
        Arc::new(Self {
            events,
            loaded: AtomicU64::new(0),
            total,
        })
    }

    fn advance(&self, bytes: u64) {
        let loaded = self.loaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.events.on_progress(loaded, self.total, true);
    }
}

async fn file_body(file: &FileHandle, counter: Arc<ProgressCounter>) -> Result<Body, Error> {
    let reader = file.reader().await?;
    let stream = ReaderStream::with_capacity(reader, CHUNK_SIZE)
        .inspect_ok(move |chunk| counter.advance(chunk.len() as u64));
    Ok(Body::wrap_stream(stream))
}

/// Converts a multipart form, preserving part order.
///
/// Progress covers the file parts only.
pub(crate) async fn multipart(
    form: MultipartForm,
    events: Arc<dyn TransportEvents>,
) -> Result<Form, Error> {
    let total = form
        .parts
        .iter()
        .map(|part| match &part.value {
            FormValue::File(file) => file.size(),
            FormValue::Text(_) => 0,
        })
        .sum();
    let counter = ProgressCounter::new(events, total);

    let mut out = Form::new();
    for part in form.parts {
        out = match part.value {
            FormValue::Text(text) => out.text(part.name, text),
            FormValue::File(file) => {
                let body = file_body(&file, Arc::clone(&counter)).await?;
                let mut file_part =
                    Part::stream_with_length(body, file.size()).file_name(file.name().to_string());
                if !file.mime_type().is_empty() {
                    file_part = file_part.mime_str(file.mime_type())?;
                }
                out.part(part.name, file_part)
            }
        };
    }
    Ok(out)
}

/// Converts a raw payload. Returns the body and, for files, its length.
pub(crate) async fn payload(
    payload: Payload,
    events: Arc<dyn TransportEvents>,
) -> Result<(Body, Option<u64>), Error> {
    match payload {
        Payload::File(file) => {
            let counter = ProgressCounter::new(events, file.size());
            let body = file_body(&file, counter).await?;
            Ok((body, Some(file.size())))
        }
        Payload::Text(text) => Ok((Body::from(text), None)),
        Payload::Bytes(bytes) => Ok((Body::from(bytes), None)),
    }
}
