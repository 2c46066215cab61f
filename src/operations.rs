//! Outward-facing file transfer operations over HTTP upload.
//!
//! Every operation that moves bytes returns a live [`Transfer`] at once and
//! runs negotiation and the HTTP body on its own Tokio task. Failures after
//! that point surface only through the transfer's status.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::download;
use crate::error::UploadError;
use crate::events::{FileTransferListener, ListenerRegistry};
use crate::logging;
use crate::manager::UploadManager;
use crate::request::IncomingRequest;
use crate::session::{Destination, MessageSender};
use crate::telemetry::HttpStatsSnapshot;
use crate::transfer::{next_id, Direction, Transfer, TransferStatus};
use crate::uploader::ProgressCallback;

pub struct HttpUploadFileTransfer {
    manager: Arc<UploadManager>,
    messenger: Arc<dyn MessageSender>,
    listeners: ListenerRegistry,
}

impl HttpUploadFileTransfer {
    pub fn new(manager: Arc<UploadManager>, messenger: Arc<dyn MessageSender>) -> Self {
        Self {
            manager,
            messenger,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn manager(&self) -> &Arc<UploadManager> {
        &self.manager
    }

    pub fn add_listener(&self, listener: Arc<dyn FileTransferListener>) -> bool {
        self.listeners.add_listener(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FileTransferListener>) -> bool {
        self.listeners.remove_listener(listener)
    }

    pub fn send_file_to_contact(&self, contact: &str, file: &Path) -> Result<Transfer, UploadError> {
        self.send_file(Destination::Contact(contact.to_string()), file)
    }

    pub fn send_file_to_room(&self, room: &str, file: &Path) -> Result<Transfer, UploadError> {
        self.send_file(Destination::Room(room.to_string()), file)
    }

    /// Uploads `file` and posts its share URL to `to`.
    ///
    /// Fails directly only when the file is missing, empty or unreadable.
    /// Must be called from within a Tokio runtime.
    pub fn send_file(&self, to: Destination, file: &Path) -> Result<Transfer, UploadError> {
        let size = readable_file_size(file)?;

        let transfer = Transfer::new(next_id(), Direction::Out, Some(to.clone()), file.to_path_buf());
        logging::info_kv(
            "outgoing transfer created",
            &[
                ("transfer", transfer.id()),
                ("to", to.address()),
                ("file", &file.display().to_string()),
                ("size", &size.to_string()),
            ],
        );
        self.listeners.fire_transfer_created(&transfer);

        let manager = self.manager.clone();
        let messenger = self.messenger.clone();
        let task_transfer = transfer.clone();
        let path = file.to_path_buf();
        tokio::spawn(async move {
            let shared = task_transfer
                .run(upload_job(&manager, &task_transfer, path))
                .await;
            let Some(get_url) = shared else {
                return;
            };
            if let Err(err) = messenger.send_text(&to, get_url.as_str()).await {
                logging::error_kv(
                    "failed to deliver share url",
                    &[
                        ("transfer", task_transfer.id()),
                        ("to", to.address()),
                        ("error", &format!("{err:#}")),
                    ],
                );
            }
        });
        Ok(transfer)
    }

    /// Wraps a share URL received from `sender` and announces it to
    /// listeners.
    pub fn receive_url(&self, sender: &str, url: url::Url) -> IncomingRequest {
        let request = IncomingRequest::new(sender, url);
        logging::info_kv(
            "incoming transfer request",
            &[
                ("request", request.id()),
                ("from", sender),
                ("url", request.download_url().as_str()),
            ],
        );
        self.listeners.fire_request_received(&request);
        request
    }

    /// Starts downloading the request's URL into `destination`.
    /// Must be called from within a Tokio runtime.
    pub fn accept_incoming(&self, request: &IncomingRequest, destination: &Path) -> Transfer {
        let transfer = Transfer::new(
            request.id().to_string(),
            Direction::In,
            Some(Destination::Contact(request.sender().to_string())),
            destination.to_path_buf(),
        );
        self.listeners.fire_transfer_created(&transfer);

        let http = self.manager.http().clone();
        let url = request.download_url().clone();
        let dest: PathBuf = destination.to_path_buf();
        let task_transfer = transfer.clone();
        tokio::spawn(async move {
            let progress_transfer = task_transfer.clone();
            task_transfer
                .run(async {
                    task_transfer.set_status(TransferStatus::InProgress, None);
                    download::get_to_file(&http, &url, &dest, |n| progress_transfer.set_progress(n))
                        .await
                })
                .await;
        });
        transfer
    }

    pub fn reject_incoming(&self, request: &IncomingRequest) {
        logging::info_kv("incoming transfer rejected", &[("request", request.id())]);
        self.listeners.fire_request_rejected(request);
    }

    pub fn cancel(&self, transfer: &Transfer) {
        transfer.cancel();
    }

    /// Limit of the discovered default service; `None` means unknown, not
    /// unlimited.
    pub fn maximum_file_length(&self) -> Option<u64> {
        self.manager
            .default_upload_service()
            .and_then(|svc| svc.max_file_size())
    }

    pub fn http_stats(&self) -> HttpStatsSnapshot {
        self.manager.http().stats().snapshot()
    }
}

async fn upload_job(
    manager: &UploadManager,
    transfer: &Transfer,
    path: PathBuf,
) -> Result<url::Url, UploadError> {
    manager.ensure_upload_service().await;
    // The first notification comes once the slot is issued, right before
    // the body starts moving.
    let progress_transfer = transfer.clone();
    let progress: ProgressCallback = Arc::new(move |sent, _total| {
        if sent == 0 {
            progress_transfer.set_status(TransferStatus::InProgress, None);
        }
        progress_transfer.set_progress(sent);
    });
    manager.upload_file(&path, Some(progress)).await
}

fn readable_file_size(path: &Path) -> Result<u64, UploadError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| UploadError::InvalidArgument(format!("{}: {e}", path.display())))?;
    if !meta.is_file() {
        return Err(UploadError::InvalidArgument(format!(
            "the path {} is not a file",
            path.display()
        )));
    }
    std::fs::File::open(path)
        .map_err(|e| UploadError::InvalidArgument(format!("{}: {e}", path.display())))?;
    if meta.len() == 0 {
        return Err(UploadError::InvalidArgument(format!(
            "{} is empty",
            path.display()
        )));
    }
    Ok(meta.len())
}
