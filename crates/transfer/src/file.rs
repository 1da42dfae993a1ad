use std::io::{self, Cursor, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::mime_class::guess_mime_type;

/// Where the bytes of a [`FileHandle`] live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Bytes held in memory.
    Memory(Bytes),
    /// A file on disk, read lazily when the request body is streamed.
    Disk(Arc<PathBuf>),
}

/// A byte range of a file selected for upload.
///
/// Slicing never copies data: it narrows `[start, end)` over the same
/// source, so handles are cheap to clone and compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    source: FileSource,
    start: u64,
    end: u64,
    name: String,
    mime_type: String,
    last_modified: Option<DateTime<Utc>>,
}

impl FileHandle {
    /// Creates a handle over in-memory bytes.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        let end = data.len() as u64;
        Self {
            source: FileSource::Memory(data),
            start: 0,
            end,
            name: name.into(),
            mime_type: mime_type.into(),
            last_modified: None,
        }
    }

    /// Creates a handle over a file on disk.
    ///
    /// The MIME type is guessed from the file extension and the
    /// last-modified time is taken from the file metadata.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = guess_mime_type(&name).to_string();

        Ok(Self {
            source: FileSource::Disk(Arc::new(path.to_path_buf())),
            start: 0,
            end: metadata.len(),
            name,
            mime_type,
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// Sets the last-modified timestamp.
    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Absolute byte range of this handle within its source.
    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// Number of bytes covered by this handle.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns a handle over `[offset, size)` of this handle.
    ///
    /// `offset` is relative to this handle and clamped to its end.
    pub fn slice_from(&self, offset: u64) -> Self {
        Self {
            start: self.start.saturating_add(offset).min(self.end),
            ..self.clone()
        }
    }

    /// Opens an async reader over exactly the bytes of this handle.
    pub async fn reader(&self) -> io::Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        match &self.source {
            FileSource::Memory(data) => {
                let slice = data.slice(self.start as usize..self.end as usize);
                Ok(Box::new(Cursor::new(slice)))
            }
            FileSource::Disk(path) => {
                let mut file = tokio::fs::File::open(path.as_ref()).await?;
                file.seek(SeekFrom::Start(self.start)).await?;
                Ok(Box::new(file.take(self.size())))
            }
        }
    }

    /// Reads the whole range into memory.
    pub async fn read_all(&self) -> io::Result<Bytes> {
        if let FileSource::Memory(data) = &self.source {
            return Ok(data.slice(self.start as usize..self.end as usize));
        }
        let mut reader = self.reader().await?;
        let mut buf = Vec::with_capacity(self.size() as usize);
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Read-only snapshot of a file used for policy checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl From<&FileHandle> for FileDescriptor {
    fn from(file: &FileHandle) -> Self {
        Self {
            name: file.name.clone(),
            size: file.size(),
            mime_type: file.mime_type.clone(),
            last_modified: file.last_modified,
        }
    }
}
