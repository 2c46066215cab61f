//! Streaming GET of a shared file straight into its destination.

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::UploadError;
use crate::http::{map_get_status, HttpTransport};

/// Downloads `url` into `dest`, calling `progress` with the running byte
/// count after every chunk written. Returns the total written.
///
/// `dest` is created or truncated only once the server answered with success.
pub async fn get_to_file<F>(
    http: &HttpTransport,
    url: &Url,
    dest: &Path,
    mut progress: F,
) -> Result<u64, UploadError>
where
    F: FnMut(u64),
{
    let stats = http.stats();
    let resp = http.http().get(url.clone()).send().await.map_err(|err| {
        stats.set_last_error(&err);
        UploadError::io(err)
    })?;
    let resp = map_get_status(resp).await.inspect_err(|err| stats.set_last_error(err))?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| UploadError::io(anyhow::Error::new(e).context(format!("create {}", dest.display()))))?;

    let mut written = 0u64;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| {
            stats.set_last_error(&err);
            UploadError::io(err)
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| UploadError::io(anyhow::Error::new(e).context(format!("write {}", dest.display()))))?;
        written += chunk.len() as u64;
        stats.on_recv(chunk.len() as u64);
        progress(written);
    }
    file.flush()
        .await
        .map_err(|e| UploadError::io(anyhow::Error::new(e).context(format!("flush {}", dest.display()))))?;
    Ok(written)
}
