//! BLOB transfer: multipart upload with progress and cancellation, streamed download.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info};

use crate::error::{AceQLError, AceQLResult, ProtocolError};
use crate::protocol::action;
use crate::protocol::envelope::ResultEnvelope;
use crate::protocol::parameters::BlobStream;
use crate::session::transport::SessionTransport;

/// Upload progress in percent, observable through a `watch` channel.
#[derive(Debug, Clone)]
pub struct ProgressIndicator {
    tx: Arc<watch::Sender<u8>>,
}

impl Default for ProgressIndicator {
    fn default() -> Self { Self::new() }
}

impl ProgressIndicator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0u8);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<u8> { self.tx.subscribe() }

    pub fn percent(&self) -> u8 { *self.tx.borrow() }

    pub(crate) fn set(&self, percent: u8) { self.tx.send_replace(percent.min(100)); }
}

/// Byte counter shared by every BLOB of one statement.
#[derive(Debug, Clone)]
pub struct UploadProgress {
    indicator: ProgressIndicator,
    total: u64,
    sent: Arc<AtomicU64>,
}

impl UploadProgress {
    pub fn new(indicator: ProgressIndicator, total: u64) -> Self {
        indicator.set(0);
        Self { indicator, total, sent: Arc::new(AtomicU64::new(0)) }
    }

    pub fn sent(&self) -> u64 { self.sent.load(Ordering::Relaxed) }

    fn advance(&self, n: u64) {
        let sent = self.sent.fetch_add(n, Ordering::Relaxed) + n;
        // 100 is reserved for completion
        let pct = if self.total == 0 { 99 } else { (sent.saturating_mul(100) / self.total).min(99) };
        self.indicator.set(pct as u8);
    }

    pub fn complete(&self) { self.indicator.set(100); }
}

type BoxedSource = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Request body of one upload. Counts progress and drops the source as soon as
/// the token fires, even if the HTTP client still holds the body.
struct UploadBody {
    source: Option<ReaderStream<BoxedSource>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    progress: Option<UploadProgress>,
}

impl Stream for UploadBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(source) = this.source.as_mut() else {
            return Poll::Ready(None);
        };
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.source = None;
            return Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::Interrupted, "upload cancelled"))));
        }
        let next = Pin::new(source).poll_next(cx);
        match &next {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(p) = &this.progress {
                    p.advance(chunk.len() as u64);
                }
            }
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.source = None,
            Poll::Pending => {}
        }
        next
    }
}

/// Upload `stream` under `blob_id`. The stream is consumed on every exit path.
pub async fn upload(
    transport: &SessionTransport,
    blob_id: &str,
    mut stream: BlobStream,
    progress: Option<&UploadProgress>,
    cancel: &CancellationToken,
) -> AceQLResult<ResultEnvelope> {
    let length = stream.length();
    let reader = stream
        .take_reader()
        .ok_or_else(|| AceQLError::binding(format!("BLOB stream for {} was already consumed", blob_id)))?;
    if cancel.is_cancelled() {
        return Err(AceQLError::cancelled(format!("upload of {} cancelled before start", blob_id)));
    }

    let body = UploadBody {
        source: Some(ReaderStream::new(reader)),
        cancelled: Box::pin(cancel.clone().cancelled_owned()),
        progress: progress.cloned(),
    };
    let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), length)
        .file_name(blob_id.to_string())
        .mime_str("application/octet-stream")?;
    let form = Form::new().text("blob_id", blob_id.to_string()).part("file", part);

    debug!(target: "aceql::blob", "uploading {} ({} bytes)", blob_id, length);
    let request = async {
        let resp = transport.post_multipart(action::BLOB_UPLOAD, form).await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        ResultEnvelope::parse(&text, status).into_result()
    };
    let envelope = tokio::select! {
        // the body fails once cancelled; report the cancellation, not the transport error
        biased;
        _ = cancel.cancelled() => {
            info!(target: "aceql::blob", "upload of {} cancelled", blob_id);
            return Err(AceQLError::cancelled(format!("upload of {} cancelled", blob_id)));
        }
        r = request => r?,
    };
    if let Some(p) = progress {
        if p.sent() >= p.total {
            p.complete();
        }
    }
    Ok(envelope)
}

/// Downloaded BLOB content, read as it arrives.
pub struct BlobReader {
    inner: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
}

impl AsyncRead for BlobReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

pub async fn download(transport: &SessionTransport, blob_id: &str) -> AceQLResult<BlobReader> {
    let fields = [("blob_id".to_string(), blob_id.to_string())];
    let resp = transport.post(action::BLOB_DOWNLOAD, &fields).await?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ResultEnvelope::parse(&text, status.as_u16()).into_error());
    }
    debug!(target: "aceql::blob", "downloading {}", blob_id);
    let body = resp.bytes_stream().map(|r| r.map_err(io::Error::other)).boxed();
    Ok(BlobReader { inner: StreamReader::new(body) })
}

pub async fn get_length(transport: &SessionTransport, blob_id: &str) -> AceQLResult<i64> {
    let fields = [("blob_id".to_string(), blob_id.to_string())];
    let envelope = transport.post_expect_ok(action::GET_BLOB_LENGTH, &fields).await?;
    envelope.get_i64("length")?.ok_or_else(|| {
        AceQLError::Protocol(ProtocolError::new(0, "get_blob_length response has no length").with_http_status(envelope.http_status()))
    })
}
