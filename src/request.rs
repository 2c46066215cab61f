use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_LENGTH;
use url::Url;

use crate::http::HttpTransport;
use crate::logging;
use crate::transfer::next_id;

/// A share URL received from a contact, waiting to be accepted or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    id: String,
    sender: String,
    download_url: Url,
}

impl IncomingRequest {
    pub fn new(sender: impl Into<String>, download_url: Url) -> Self {
        Self {
            id: next_id(),
            sender: sender.into(),
            download_url,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn download_url(&self) -> &Url {
        &self.download_url
    }

    /// Last path segment of the download URL, percent-decoded.
    pub fn file_name(&self) -> String {
        let raw = self
            .download_url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        percent_decode_str(raw).decode_utf8_lossy().into_owned()
    }

    /// Size announced by the server for a `HEAD` of the download URL,
    /// without following redirects.
    pub async fn file_size(&self, http: &HttpTransport) -> Option<u64> {
        let resp = match http.probe().head(self.download_url.clone()).send().await {
            Ok(resp) => resp,
            Err(err) => {
                logging::warn_kv(
                    "file size probe failed",
                    &[("url", self.download_url.as_str()), ("error", &err.to_string())],
                );
                return None;
            }
        };
        if !resp.status().is_success() {
            return None;
        }
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}
