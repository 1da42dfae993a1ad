use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use upqueue_transfer::{
    RequestBody, Transport, TransportEvents, TransportRequest, TransportResponse,
    TransportSession,
};

use crate::{Error, body};

/// [`Transport`] over `reqwest`.
///
/// Requests with `with_credentials` go through a client that keeps a
/// cookie store; all others use a cookie-less client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    credentialed: reqwest::Client,
    runtime: Handle,
}

impl HttpTransport {
    /// Creates a transport that spawns sessions on the current tokio runtime.
    pub fn new() -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Self::with_runtime(runtime)
    }

    pub fn with_runtime(runtime: Handle) -> Result<Self, Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            credentialed: reqwest::Client::builder().cookie_store(true).build()?,
            runtime,
        })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl Transport for HttpTransport {
    fn open(
        &self,
        request: TransportRequest,
        events: Arc<dyn TransportEvents>,
    ) -> Arc<dyn TransportSession> {
        let cancel = CancellationToken::new();
        let client = if request.with_credentials {
            self.credentialed.clone()
        } else {
            self.client.clone()
        };
        self.runtime
            .spawn(run_session(client, request, events, cancel.clone()));
        Arc::new(HttpSession { cancel })
    }
}

/// Handle to one running request.
#[derive(Debug)]
pub struct HttpSession {
    cancel: CancellationToken,
}

impl TransportSession for HttpSession {
    /// `on_abort` follows asynchronously unless the request already ended.
    fn abort(&self) {
        self.cancel.cancel();
    }
}

async fn run_session(
    client: reqwest::Client,
    request: TransportRequest,
    events: Arc<dyn TransportEvents>,
    cancel: CancellationToken,
) {
    let url = request.url.clone();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(%url, "request aborted");
            events.on_abort(TransportResponse::default());
        }
        result = send(&client, request, Arc::clone(&events)) => match result {
            Ok(response) => {
                debug!(%url, status = response.status, "response received");
                events.on_load(response);
            }
            Err(err) => {
                warn!(%url, error = %err, "request failed");
                events.on_error(TransportResponse::default());
            }
        }
    }
}

async fn send(
    client: &reqwest::Client,
    request: TransportRequest,
    events: Arc<dyn TransportEvents>,
) -> Result<TransportResponse, Error> {
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|_| Error::InvalidMethod(request.method.clone()))?;

    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    let raw = match request.body {
        RequestBody::Multipart(form) => {
            builder = builder.multipart(body::multipart(form, events.clone()).await?);
            None
        }
        RequestBody::Raw(payload) => Some(payload),
        RequestBody::Deferred(pending) => Some(pending.await),
    };
    if let Some(payload) = raw {
        let (body, length) = body::payload(payload, events).await?;
        if let Some(length) = length {
            builder = builder.header(CONTENT_LENGTH, length);
        }
        builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let raw_headers = raw_header_block(response.headers());
    let body = response.text().await?;
    Ok(TransportResponse {
        status,
        body,
        raw_headers,
    })
}

/// Renders headers as `name: value\r\n` lines.
pub fn raw_header_block(headers: &HeaderMap) -> String {
    let mut block = String::new();
    for (name, value) in headers {
        block.push_str(name.as_str());
        block.push_str(": ");
        block.push_str(&String::from_utf8_lossy(value.as_bytes()));
        block.push_str("\r\n");
    }
    block
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use upqueue_transfer::{
        FileHandle, PayloadFormatter, TransferEvent, TransferItem, UploadOptions,
    };

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn request_complete(buf: &[u8]) -> bool {
        let Some(end) = position(buf, b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body = &buf[end + 4..];
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        match length {
            Some(length) => body.len() >= length,
            None if head.contains("transfer-encoding: chunked") => body.ends_with(b"0\r\n\r\n"),
            None => true,
        }
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if request_complete(&buf) {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Starts a mock HTTP server that answers one request and hands back
    /// the raw request it received.
    async fn mock_server(
        status: u16,
        extra_headers: &str,
        body: &str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/upload");
        let extra_headers = extra_headers.to_string();
        let body = body.to_string();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let resp = format!(
                "HTTP/1.1 {status} Mock\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(resp.as_bytes()).await;
            let _ = stream.shutdown().await;
            request
        });

        (url, handle)
    }

    /// Starts a mock HTTP server that reads forever and never answers.
    async fn silent_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/upload");

        let handle = tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            }
        });

        (url, handle)
    }

    fn outcomes(item: &TransferItem) -> mpsc::UnboundedReceiver<(&'static str, TransferEvent)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let streams = [
            ("success", item.on_success()),
            ("error", item.on_error()),
            ("cancel", item.on_cancel()),
            ("pause", item.on_pause()),
        ];
        for (kind, stream) in streams {
            let tx = tx.clone();
            let _ = stream.subscribe(move |event: &TransferEvent| {
                let _ = tx.send((kind, event.clone()));
            });
        }
        rx
    }

    async fn next_outcome(
        rx: &mut mpsc::UnboundedReceiver<(&'static str, TransferEvent)>,
    ) -> (&'static str, TransferEvent) {
        tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("outcome channel closed")
    }

    fn item(file: FileHandle, options: UploadOptions) -> TransferItem {
        let transport = Arc::new(HttpTransport::new().unwrap());
        TransferItem::new(file, options, transport)
    }

    #[tokio::test]
    async fn multipart_upload_succeeds() {
        let (url, server) = mock_server(201, "X-Upload-Id: 42\r\n", "stored").await;
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer t0k3n".to_string());
        let mut params = serde_json::Map::new();
        params.insert(
            "key".to_string(),
            serde_json::Value::from("uploads/{{file_name}}"),
        );
        params.insert("acl".to_string(), serde_json::Value::from("private"));
        let options = UploadOptions {
            url,
            headers,
            additional_parameter: params,
            ..UploadOptions::default()
        };
        let item = item(
            FileHandle::from_bytes("a.txt", "text/plain", &b"hello world"[..]),
            options,
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        let (kind, event) = next_outcome(&mut rx).await;

        assert_eq!(kind, "success");
        assert_eq!(event.status, 201);
        assert_eq!(event.response, "stored");
        assert_eq!(event.headers.get("x-upload-id").unwrap(), "42");
        assert!(item.is_success());
        assert_eq!(item.progress(), 100);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /upload HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer t0k3n"));
        assert!(request.contains("multipart/form-data; boundary="));
        assert!(request.contains("name=\"file\"; filename=\"a.txt\""));
        assert!(request.contains("hello world"));
        assert!(request.contains("uploads/a.txt"));
        let file_at = request.find("name=\"file\"").unwrap();
        let key_at = request.find("name=\"key\"").unwrap();
        let acl_at = request.find("name=\"acl\"").unwrap();
        assert!(file_at < key_at);
        assert!(key_at < acl_at);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let (url, server) = mock_server(500, "", "boom").await;
        let item = item(
            FileHandle::from_bytes("a.txt", "text/plain", &b"data"[..]),
            UploadOptions {
                url,
                ..UploadOptions::default()
            },
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        let (kind, event) = next_outcome(&mut rx).await;

        assert_eq!(kind, "error");
        assert_eq!(event.status, 500);
        assert_eq!(event.response, "boom");
        assert!(item.is_error());
        assert_eq!(item.bytes_sent(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn raw_payload_is_sent_as_is() {
        let (url, server) = mock_server(200, "", "").await;
        let item = item(
            FileHandle::from_bytes("a.bin", "application/octet-stream", &b"raw bytes"[..]),
            UploadOptions {
                url,
                method: "PUT".into(),
                disable_multipart: true,
                ..UploadOptions::default()
            },
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        assert_eq!(next_outcome(&mut rx).await.0, "success");

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /upload HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("content-length: 9"));
        assert!(request.ends_with("\r\n\r\nraw bytes"));
    }

    #[tokio::test]
    async fn async_formatter_sends_json_text() {
        let (url, server) = mock_server(200, "", "").await;
        let item = item(
            FileHandle::from_bytes("a.txt", "text/plain", &b"abc"[..]),
            UploadOptions {
                url,
                disable_multipart: true,
                format_data: PayloadFormatter::from_async(|item| {
                    let name = item.descriptor().name.clone();
                    async move { serde_json::json!({ "name": name }) }
                }),
                ..UploadOptions::default()
            },
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        assert_eq!(next_outcome(&mut rx).await.0, "success");

        let request = server.await.unwrap();
        assert!(request.ends_with(r#"{"name":"a.txt"}"#));
    }

    #[tokio::test]
    async fn disk_file_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![7u8; 200 * 1024]).unwrap();

        let (url, server) = mock_server(200, "", "").await;
        let item = item(
            FileHandle::open(&path).await.unwrap(),
            UploadOptions {
                url,
                ..UploadOptions::default()
            },
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _ = item
            .on_progress()
            .subscribe(move |e| s.lock().unwrap().push((e.progress, e.bytes_sent)));
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        assert_eq!(next_outcome(&mut rx).await.0, "success");
        server.await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.len() > 1);
        assert_eq!(*seen.last().unwrap(), (100, 200 * 1024));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[tokio::test]
    async fn pause_aborts_request() {
        let (url, server) = silent_server().await;
        let item = item(
            FileHandle::from_bytes("a.txt", "text/plain", &b"hello"[..]),
            UploadOptions {
                url,
                ..UploadOptions::default()
            },
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        item.pause();
        let (kind, _) = next_outcome(&mut rx).await;

        assert_eq!(kind, "pause");
        assert!(item.is_paused());
        assert!(!item.is_uploading());
        server.abort();
    }

    #[tokio::test]
    async fn cancel_aborts_request() {
        let (url, server) = silent_server().await;
        let item = item(
            FileHandle::from_bytes("a.txt", "text/plain", &b"hello"[..]),
            UploadOptions {
                url,
                ..UploadOptions::default()
            },
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        item.cancel();
        let (kind, event) = next_outcome(&mut rx).await;

        assert_eq!(kind, "cancel");
        assert_eq!(event.status, 0);
        assert_eq!(&item.file(), item.original_file());
        server.abort();
    }

    #[tokio::test]
    async fn connection_refused_reports_status_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let item = item(
            FileHandle::from_bytes("a.txt", "text/plain", &b"hello"[..]),
            UploadOptions {
                url: format!("http://127.0.0.1:{port}/upload"),
                ..UploadOptions::default()
            },
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        let (kind, event) = next_outcome(&mut rx).await;

        assert_eq!(kind, "error");
        assert_eq!(event.status, 0);
        assert!(item.is_error());
    }

    #[tokio::test]
    async fn invalid_method_reports_error() {
        let item = item(
            FileHandle::from_bytes("a.txt", "text/plain", &b"hello"[..]),
            UploadOptions {
                url: "http://127.0.0.1:9/upload".into(),
                method: "NOT A METHOD".into(),
                ..UploadOptions::default()
            },
        );
        let mut rx = outcomes(&item);

        item.upload().unwrap();
        assert_eq!(next_outcome(&mut rx).await.0, "error");
    }

    #[test]
    fn new_requires_runtime() {
        assert!(matches!(HttpTransport::new(), Err(Error::NoRuntime)));
    }

    #[test]
    fn header_block_lines() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let block = raw_header_block(&headers);
        assert!(block.contains("content-type: text/plain\r\n"));
        assert!(block.contains("set-cookie: a=1\r\n"));
        assert!(block.contains("set-cookie: b=2\r\n"));
        assert_eq!(block.lines().count(), 3);

        let parsed = upqueue_transfer::parse_headers(&block);
        assert_eq!(parsed.get("set-cookie").unwrap(), "a=1, b=2");
    }
}
