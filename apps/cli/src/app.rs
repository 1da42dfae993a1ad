//! Wires the queue, the HTTP transport and the terminal together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use upqueue_http::HttpTransport;
use upqueue_queue::QueueController;
use upqueue_transfer::{FileHandle, TransferEvent, TransferItem, TransferState};

use crate::config::Config;

/// Final state counts across the queued files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub uploaded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub paused: usize,
    /// Never started, e.g. behind a failure in a sequential queue.
    pub pending: usize,
}

impl Summary {
    fn from_items(items: &[TransferItem]) -> Self {
        let mut summary = Self::default();
        for item in items {
            match item.state() {
                TransferState::Success => summary.uploaded += 1,
                TransferState::Error => summary.failed += 1,
                TransferState::Cancelled => summary.cancelled += 1,
                TransferState::Paused => summary.paused += 1,
                TransferState::Idle | TransferState::Uploading => summary.pending += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Uploaded,
    Failed,
    Cancelled,
    Paused,
}

/// Uploads `files` and waits until the queue settles.
pub async fn run(config: Config, files: Vec<PathBuf>, validate: bool) -> anyhow::Result<Summary> {
    if config.upload.url.is_empty() {
        anyhow::bail!("no upload URL configured (set [upload].url or pass --url)");
    }

    let mut handles = Vec::with_capacity(files.len());
    for path in &files {
        let handle = FileHandle::open(path)
            .await
            .with_context(|| format!("cannot open {}", path.display()))?;
        if handle.is_empty() {
            anyhow::bail!("refusing to upload empty file {}", path.display());
        }
        handles.push(handle);
    }

    let transport = Arc::new(HttpTransport::new()?);
    let queue = QueueController::new(config.queue.clone(), transport);
    let (tx, mut rx) = mpsc::unbounded_channel();
    forward(&queue, tx);

    let items = queue.add_files_to_queue(handles, &config.upload, validate)?;
    queue.upload_all()?;

    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                tracing::info!("SIGINT received, cancelling uploads");
                interrupted = true;
                queue.cancel_all();
            }
            received = rx.recv() => {
                let Some((outcome, event)) = received else {
                    break;
                };
                report(outcome, &event);
                if settled(&items, outcome) {
                    break;
                }
            }
        }
    }

    Ok(Summary::from_items(&items))
}

/// Pushes every terminal queue event into `tx` and logs progress.
fn forward(queue: &QueueController, tx: mpsc::UnboundedSender<(Outcome, TransferEvent)>) {
    let streams = [
        (Outcome::Uploaded, queue.on_item_uploaded()),
        (Outcome::Failed, queue.on_item_error()),
        (Outcome::Cancelled, queue.on_item_cancel()),
        (Outcome::Paused, queue.on_item_pause()),
    ];
    for (outcome, stream) in streams {
        let tx = tx.clone();
        let _ = stream.subscribe(move |event: &TransferEvent| {
            let _ = tx.send((outcome, event.clone()));
        });
    }

    let _ = queue.on_item_progress().subscribe(|event| {
        tracing::debug!(
            file = %event.item.descriptor().name,
            progress = event.progress,
            bytes_sent = event.bytes_sent,
            "uploading"
        );
    });
}

fn report(outcome: Outcome, event: &TransferEvent) {
    let name = &event.item.descriptor().name;
    match outcome {
        Outcome::Uploaded => tracing::info!(file = %name, status = event.status, "uploaded"),
        Outcome::Failed => tracing::error!(
            file = %name,
            status = event.status,
            response = %event.response,
            "upload failed"
        ),
        Outcome::Cancelled => tracing::warn!(file = %name, "upload cancelled"),
        Outcome::Paused => tracing::warn!(file = %name, "upload paused"),
    }
}

/// Nothing is in flight and nothing more will start on its own.
///
/// Only a success lets the queue continue with another item.
fn settled(items: &[TransferItem], last: Outcome) -> bool {
    let resting = |item: &TransferItem| {
        matches!(
            item.state(),
            TransferState::Success
                | TransferState::Error
                | TransferState::Cancelled
                | TransferState::Paused
        )
    };
    items.iter().all(resting)
        || (last != Outcome::Uploaded && !items.iter().any(TransferItem::is_uploading))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_rejected() {
        let err = run(Config::default(), vec![PathBuf::from("a.txt")], false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no upload URL"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.upload.url = "http://127.0.0.1:9/upload".into();

        let err = run(config, vec![tmp.path().join("nope.bin")], false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope.bin"));
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();
        let mut config = Config::default();
        config.upload.url = "http://127.0.0.1:9/upload".into();

        let err = run(config, vec![path], false).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn validation_failure_stops_run() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big.bin");
        std::fs::write(&path, vec![0u8; 1000]).unwrap();

        let mut config = Config::default();
        config.upload.url = "http://127.0.0.1:9/upload".into();
        config.upload.max_file_size = Some(500);

        let err = run(config, vec![path], true).await.unwrap_err();
        assert!(err.to_string().contains("fileSize"));
    }

    #[tokio::test]
    async fn unreachable_server_counts_as_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let mut config = Config::default();
        config.upload.url = format!("http://127.0.0.1:{port}/upload");

        let summary = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            run(config, vec![path], false),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(
            summary,
            Summary {
                failed: 1,
                ..Summary::default()
            }
        );
    }
}
