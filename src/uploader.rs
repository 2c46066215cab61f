//! Streaming PUT of a file body to an upload slot.

use std::path::Path;
use std::sync::Arc;

use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Body;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::error::UploadError;
use crate::http::{map_put_status, HttpTransport};
use crate::wire::Slot;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Callback invoked with `(bytes_sent, total_bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Uploads `size` bytes read from `reader` to the slot's PUT URL.
///
/// The body is read in blocks of the transport's block size and sent with a
/// fixed `Content-Length`; progress fires once with zero before the request
/// and after every block handed to the connection.
pub async fn put_stream<R>(
    http: &HttpTransport,
    slot: &Slot,
    reader: R,
    size: u64,
    progress: Option<ProgressCallback>,
) -> Result<(), UploadError>
where
    R: AsyncRead + Send + Sync + Unpin + 'static,
{
    let stats = http.stats();
    let headers = request_headers(slot, size)?;

    if let Some(cb) = &progress {
        cb(0, size);
    }
    let mut sent = 0u64;
    let body_stats = stats.clone();
    let body = ReaderStream::with_capacity(reader, http.block_size()).inspect_ok(move |block| {
        let n = block.len() as u64;
        sent += n;
        body_stats.on_send(n);
        if let Some(cb) = &progress {
            cb(sent, size);
        }
    });

    let resp = http
        .http()
        .put(slot.put_url().clone())
        .headers(headers)
        .body(Body::wrap_stream(body))
        .send()
        .await
        .map_err(|err| {
            stats.set_last_error(&err);
            UploadError::io(err)
        })?;

    let result = map_put_status(resp).await;
    if let Err(err) = &result {
        stats.set_last_error(err);
    }
    result
}

/// Uploads a local file; returns the number of bytes sent.
pub async fn put_file(
    http: &HttpTransport,
    slot: &Slot,
    path: &Path,
    progress: Option<ProgressCallback>,
) -> Result<u64, UploadError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| UploadError::io(anyhow::Error::new(e).context(format!("open {}", path.display()))))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| UploadError::io(anyhow::Error::new(e).context(format!("stat {}", path.display()))))?
        .len();
    put_stream(http, slot, file, size, progress).await?;
    Ok(size)
}

fn request_headers(slot: &Slot, size: u64) -> Result<HeaderMap, UploadError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    for (name, value) in slot.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| UploadError::malformed(format!("invalid slot header name {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| UploadError::malformed(format!("invalid value for slot header {name}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
