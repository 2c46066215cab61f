//! Upload service discovery and slot negotiation for one session.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::AsyncRead;
use url::Url;

use crate::error::UploadError;
use crate::http::HttpTransport;
use crate::logging;
use crate::service::UploadService;
use crate::session::{IqReply, SessionTransport};
use crate::uploader::{self, ProgressCallback, OCTET_STREAM};
use crate::wire::{self, Slot, SlotRequest};

/// Owned alongside the session object; caches the default upload service.
pub struct UploadManager {
    session: Arc<dyn SessionTransport>,
    http: HttpTransport,
    default_service: Mutex<Option<UploadService>>,
}

impl UploadManager {
    pub fn new(session: Arc<dyn SessionTransport>, http: HttpTransport) -> Self {
        Self {
            session,
            http,
            default_service: Mutex::new(None),
        }
    }

    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    fn cached(&self) -> MutexGuard<'_, Option<UploadService>> {
        self.default_service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Walks the server's items and caches the first one offering HTTP
    /// upload. Returns whether a service was found.
    pub async fn discover_upload_service(&self) -> bool {
        let root = self.session.service_name();
        let items = match self.session.discover_items(&root).await {
            Ok(items) => items,
            Err(err) => {
                logging::debug_kv(
                    "failed to discover items",
                    &[("entity", &root), ("error", &format!("{err:#}"))],
                );
                return false;
            }
        };

        for item in items {
            let info = match self.session.discover_info(&item).await {
                Ok(info) => info,
                Err(err) => {
                    logging::warn_kv(
                        "failed to discover entity info",
                        &[("entity", &item), ("error", &format!("{err:#}"))],
                    );
                    continue;
                }
            };
            if let Some(service) = info.upload_service() {
                logging::info_kv(
                    "upload service discovered",
                    &[
                        ("address", service.address()),
                        ("version", service.version().namespace()),
                        (
                            "max_file_size",
                            &service
                                .max_file_size()
                                .map(|n| n.to_string())
                                .unwrap_or_else(|| "unbounded".to_string()),
                        ),
                    ],
                );
                *self.cached() = Some(service);
                return true;
            }
        }
        false
    }

    /// Runs discovery unless a service is already cached.
    pub async fn ensure_upload_service(&self) -> bool {
        if self.is_upload_service_discovered() {
            return true;
        }
        self.discover_upload_service().await
    }

    pub fn is_upload_service_discovered(&self) -> bool {
        self.cached().is_some()
    }

    pub fn default_upload_service(&self) -> Option<UploadService> {
        self.cached().clone()
    }

    /// Drops the cached service and discovers again after the session
    /// reconnected.
    pub async fn on_reconnected(&self) {
        *self.cached() = None;
        if !self.discover_upload_service().await {
            logging::warn_kv(
                "no upload service after reconnect",
                &[("server", &self.session.service_name())],
            );
        }
    }

    async fn resolve_service(&self, address: Option<&str>) -> Result<UploadService, UploadError> {
        let cached = self.default_upload_service();
        let Some(address) = address else {
            return cached.ok_or(UploadError::NoServiceAvailable);
        };
        if let Some(svc) = cached.filter(|s| s.address() == address) {
            return Ok(svc);
        }
        let info = self
            .session
            .discover_info(address)
            .await
            .map_err(UploadError::NegotiationFailed)?;
        info.upload_service().ok_or_else(|| {
            UploadError::InvalidArgument(format!(
                "there is no HTTP upload service running at {address:?}"
            ))
        })
    }

    /// Asks the upload service for a slot for one file.
    ///
    /// `service_address` overrides the discovered default.
    pub async fn request_slot(
        &self,
        filename: &str,
        size: u64,
        content_type: Option<&str>,
        service_address: Option<&str>,
    ) -> Result<Slot, UploadError> {
        let service = self.resolve_service(service_address).await?;
        if !service.accepts_file_of_size(size) {
            return Err(UploadError::FileTooLarge {
                max_file_size: service.max_file_size().unwrap_or(u64::MAX),
            });
        }

        let request = SlotRequest::new(
            service.address(),
            filename,
            size,
            content_type.map(str::to_string),
        )?;
        let payload = wire::encode_request(service.version(), &request);
        logging::info_kv(
            "requesting upload slot",
            &[
                ("service", service.address()),
                ("filename", filename),
                ("size", &size.to_string()),
            ],
        );

        let reply = self
            .session
            .send_request(service.address(), payload)
            .await
            .map_err(UploadError::NegotiationFailed)?;
        match reply {
            IqReply::Result(xml) => wire::decode_slot(&xml),
            IqReply::Error(xml) => match wire::decode_file_too_large(&xml) {
                Ok(Some(too_large)) => Err(UploadError::FileTooLarge {
                    max_file_size: too_large.max_file_size,
                }),
                _ => Err(UploadError::NegotiationFailed(anyhow::anyhow!(
                    "upload service {} returned error: {xml}",
                    service.address()
                ))),
            },
        }
    }

    /// Negotiates a slot for `size` bytes and streams `reader` to it.
    /// Returns the URL to share.
    pub async fn upload_stream<R>(
        &self,
        reader: R,
        filename: &str,
        size: u64,
        progress: Option<ProgressCallback>,
    ) -> Result<Url, UploadError>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        let slot = self
            .request_slot(filename, size, Some(OCTET_STREAM), None)
            .await?;
        uploader::put_stream(&self.http, &slot, reader, size, progress).await?;
        Ok(slot.get_url().clone())
    }

    pub async fn upload_file(
        &self,
        path: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<Url, UploadError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::InvalidArgument(format!("{}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(UploadError::InvalidArgument(format!(
                "the path {} is not a file",
                path.display()
            )));
        }
        // Open before negotiating so an unreadable file never costs a slot.
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UploadError::InvalidArgument(format!("{}: {e}", path.display())))?;
        let filename = file_name_of(path);
        self.upload_stream(file, &filename, meta.len(), progress)
            .await
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}
