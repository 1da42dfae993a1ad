use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{Filter, Payload, RequestBody, TransferItem};

/// Builds a raw request payload for an item.
pub type FormatFn = Arc<dyn Fn(&TransferItem) -> Payload + Send + Sync>;

/// Builds a JSON document for an item asynchronously.
pub type AsyncFormatFn =
    Arc<dyn Fn(&TransferItem) -> BoxFuture<'static, serde_json::Value> + Send + Sync>;

/// Produces the request body when multipart encoding is disabled.
#[derive(Clone)]
pub enum PayloadFormatter {
    /// Returns the payload directly.
    Sync(FormatFn),
    /// Resolves to a JSON value that is sent as its serialized text.
    Async(AsyncFormatFn),
}

impl PayloadFormatter {
    pub fn sync<F>(format: F) -> Self
    where
        F: Fn(&TransferItem) -> Payload + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(format))
    }

    pub fn from_async<F, Fut>(format: F) -> Self
    where
        F: Fn(&TransferItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = serde_json::Value> + Send + 'static,
    {
        Self::Async(Arc::new(
            move |item: &TransferItem| -> BoxFuture<'static, serde_json::Value> {
                Box::pin(format(item))
            },
        ))
    }

    pub(crate) fn format(&self, item: &TransferItem) -> RequestBody {
        match self {
            Self::Sync(format) => RequestBody::Raw(format(item)),
            Self::Async(format) => {
                let pending = format(item);
                RequestBody::Deferred(Box::pin(async move {
                    Payload::Text(pending.await.to_string())
                }))
            }
        }
    }
}

impl Default for PayloadFormatter {
    /// Sends the item's working file as-is.
    fn default() -> Self {
        Self::sync(|item| Payload::File(item.file()))
    }
}

impl fmt::Debug for PayloadFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("PayloadFormatter::Sync"),
            Self::Async(_) => f.write_str("PayloadFormatter::Async"),
        }
    }
}

/// Upload policy applied to every item created with it.
///
/// Every field has a default, so a TOML table only needs the keys it
/// overrides. `filters` and `format_data` can only be set from code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Target endpoint.
    pub url: String,
    /// HTTP method (default `POST`).
    pub method: String,
    /// Request headers sent with every upload.
    pub headers: BTreeMap<String, String>,
    /// Multipart field name of the file part (default `file`).
    pub item_alias: String,
    /// Extra multipart fields, sent in insertion order. String values may
    /// contain `{{file_name}}`.
    pub additional_parameter: serde_json::Map<String, serde_json::Value>,
    /// Put the additional fields before the file part.
    pub parameters_before_files: bool,
    /// Send the formatter's payload instead of a multipart form.
    pub disable_multipart: bool,
    /// Maximum file size in bytes.
    pub max_file_size: Option<u64>,
    /// Accepted MIME types.
    pub allowed_mime_type: Option<Vec<String>>,
    /// Accepted file classes (see [`crate::mime_class`]).
    pub allowed_file_type: Option<Vec<String>>,
    /// Start uploading as soon as the item joins a queue.
    pub auto_upload: bool,
    /// Send cookies along with the request.
    pub with_credentials: bool,
    /// Custom filters, evaluated after the built-in ones.
    #[serde(skip)]
    pub filters: Vec<Filter>,
    /// Payload formatter used when multipart is disabled.
    #[serde(skip)]
    pub format_data: PayloadFormatter,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".into(),
            headers: BTreeMap::new(),
            item_alias: "file".into(),
            additional_parameter: serde_json::Map::new(),
            parameters_before_files: false,
            disable_multipart: false,
            max_file_size: None,
            allowed_mime_type: None,
            allowed_file_type: None,
            auto_upload: false,
            with_credentials: false,
            filters: Vec::new(),
            format_data: PayloadFormatter::default(),
        }
    }
}
