use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::{FileHandle, UploadOptions};

/// Placeholder replaced by the file name in additional parameter values.
pub const FILE_NAME_PLACEHOLDER: &str = "{{file_name}}";

/// A raw (non-multipart) request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    File(FileHandle),
    Text(String),
    Bytes(Bytes),
}

/// Value of one multipart field.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    /// A file part; the handle's name is sent as the part's file name.
    File(FileHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

/// Ordered multipart form. Part order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartForm {
    pub parts: Vec<FormPart>,
}

impl MultipartForm {
    pub fn text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parts.push(FormPart {
            name: name.into(),
            value: FormValue::Text(value.into()),
        });
    }

    pub fn file(&mut self, name: impl Into<String>, file: FileHandle) {
        self.parts.push(FormPart {
            name: name.into(),
            value: FormValue::File(file),
        });
    }

    /// Returns the value of the first text field called `name`.
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match &part.value {
            FormValue::Text(text) if part.name == name => Some(text.as_str()),
            _ => None,
        })
    }
}

/// A payload that becomes available later (asynchronous formatter).
pub type PendingPayload = Pin<Box<dyn Future<Output = Payload> + Send>>;

/// Body of an upload request.
pub enum RequestBody {
    Multipart(MultipartForm),
    Raw(Payload),
    /// Resolved by the transport before the request is sent.
    Deferred(PendingPayload),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multipart(form) => f.debug_tuple("Multipart").field(form).finish(),
            Self::Raw(payload) => f.debug_tuple("Raw").field(payload).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Builds the multipart form for `file`.
///
/// The file part goes first unless `parameters_before_files` is set; some
/// servers (S3 POST policies, for one) require the fields before the file.
pub fn build_multipart(file: &FileHandle, options: &UploadOptions) -> MultipartForm {
    let mut form = MultipartForm::default();
    if !options.parameters_before_files {
        form.file(options.item_alias.clone(), file.clone());
    }

    for (key, value) in &options.additional_parameter {
        form.text(key.clone(), parameter_text(value, file.name()));
    }

    if options.parameters_before_files {
        form.file(options.item_alias.clone(), file.clone());
    }
    form
}

fn parameter_text(value: &serde_json::Value, file_name: &str) -> String {
    match value {
        serde_json::Value::String(text) => text.replacen(FILE_NAME_PLACEHOLDER, file_name, 1),
        other => other.to_string(),
    }
}
