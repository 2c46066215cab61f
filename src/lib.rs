pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod http;
pub mod logging;
pub mod manager;
pub mod operations;
pub mod request;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod transfer;
pub mod uploader;
pub mod wire;

pub use error::UploadError;
pub use events::{FileTransferListener, ListenerRegistry};
pub use manager::UploadManager;
pub use operations::HttpUploadFileTransfer;
pub use request::IncomingRequest;
pub use service::{DiscoInfo, UploadService};
pub use session::{Destination, IqReply, MessageSender, SessionTransport};
pub use transfer::{Direction, Transfer, TransferEvent, TransferListener, TransferStatus};
pub use wire::{Slot, SlotRequest, Version};
