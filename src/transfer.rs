//! Transfer handles and their status state machine.
//!
//! Status and progress changes are validated and queued under the transfer's
//! lock, then delivered to listeners in order by a per-transfer dispatcher
//! task. Nothing is queued after a terminal status.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::events::Listeners;
use crate::logging;
use crate::session::Destination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Created,
    InProgress,
    Completed,
    Failed,
    Canceled,
    Refused,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed
                | TransferStatus::Failed
                | TransferStatus::Canceled
                | TransferStatus::Refused
        )
    }

    fn can_move_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Created, InProgress | Failed | Canceled | Refused)
                | (InProgress, Completed | Failed | Canceled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Status {
        transfer_id: String,
        old: TransferStatus,
        new: TransferStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    Progress {
        transfer_id: String,
        bytes: u64,
        at: DateTime<Utc>,
    },
}

/// Observer of a single transfer.
pub trait TransferListener: Send + Sync {
    fn transfer_event(&self, event: &TransferEvent);
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Submission time in milliseconds followed by a process-wide counter.
pub(crate) fn next_id() -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}{n}", Utc::now().timestamp_millis())
}

struct TransferState {
    status: TransferStatus,
    transferred_bytes: i64,
    reason: Option<String>,
}

struct TransferInner {
    id: String,
    direction: Direction,
    peer: Option<Destination>,
    local_file: PathBuf,
    state: Mutex<TransferState>,
    status_tx: watch::Sender<TransferStatus>,
    events: mpsc::UnboundedSender<TransferEvent>,
    listeners: Arc<Listeners<dyn TransferListener>>,
    cancel: CancellationToken,
}

/// Shared handle to one upload or download. Clones observe the same transfer.
///
/// Creating a transfer spawns its event dispatcher, so it must happen inside a
/// Tokio runtime.
#[derive(Clone)]
pub struct Transfer {
    inner: Arc<TransferInner>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("status", &self.status())
            .finish()
    }
}

impl Transfer {
    pub(crate) fn new(
        id: String,
        direction: Direction,
        peer: Option<Destination>,
        local_file: PathBuf,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners: Arc<Listeners<dyn TransferListener>> = Arc::new(Listeners::default());
        tokio::spawn(dispatch(rx, listeners.clone()));
        let (status_tx, _) = watch::channel(TransferStatus::Created);
        Transfer {
            inner: Arc::new(TransferInner {
                id,
                direction,
                peer,
                local_file,
                state: Mutex::new(TransferState {
                    status: TransferStatus::Created,
                    transferred_bytes: -1,
                    reason: None,
                }),
                status_tx,
                events: tx,
                listeners,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn peer(&self) -> Option<&Destination> {
        self.inner.peer.as_ref()
    }

    pub fn local_file(&self) -> &Path {
        &self.inner.local_file
    }

    pub fn status(&self) -> TransferStatus {
        self.state().status
    }

    /// Bytes moved so far, or -1 before any byte movement started.
    pub fn transferred_bytes(&self) -> i64 {
        self.state().transferred_bytes
    }

    /// Cause attached to a FAILED transfer.
    pub fn failure_reason(&self) -> Option<String> {
        self.state().reason.clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn TransferListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TransferListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    /// Moves the transfer to CANCELED and aborts its network operation.
    /// Does nothing once the transfer reached a terminal status.
    pub fn cancel(&self) {
        if self.set_status(TransferStatus::Canceled, None) {
            logging::info_kv("transfer canceled", &[("transfer", self.id())]);
            self.inner.cancel.cancel();
        }
    }

    /// Waits until the transfer reaches a terminal status.
    pub async fn wait(&self) -> TransferStatus {
        let mut rx = self.inner.status_tx.subscribe();
        let status = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    fn state(&self) -> MutexGuard<'_, TransferState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a status transition; returns false if it is not allowed from
    /// the current status.
    pub(crate) fn set_status(&self, new: TransferStatus, reason: Option<String>) -> bool {
        let mut state = self.state();
        let old = state.status;
        if !old.can_move_to(new) {
            return false;
        }
        state.status = new;
        if new == TransferStatus::InProgress && state.transferred_bytes < 0 {
            state.transferred_bytes = 0;
        }
        if new == TransferStatus::Failed {
            state.reason = reason.clone();
        }
        self.inner.status_tx.send_replace(new);
        let _ = self.inner.events.send(TransferEvent::Status {
            transfer_id: self.inner.id.clone(),
            old,
            new,
            reason,
            at: Utc::now(),
        });
        true
    }

    /// Records progress. Ignored unless the transfer is in progress and the
    /// count does not go backwards.
    pub(crate) fn set_progress(&self, bytes: u64) {
        let mut state = self.state();
        if state.status != TransferStatus::InProgress {
            return;
        }
        let bytes_i = i64::try_from(bytes).unwrap_or(i64::MAX);
        if bytes_i < state.transferred_bytes {
            return;
        }
        state.transferred_bytes = bytes_i;
        let _ = self.inner.events.send(TransferEvent::Progress {
            transfer_id: self.inner.id.clone(),
            bytes,
            at: Utc::now(),
        });
    }

    /// Runs `work` racing it against cancellation, then records the outcome.
    /// Returns the work's value only when the transfer completed.
    pub(crate) async fn run<T, F>(&self, work: F) -> Option<T>
    where
        F: Future<Output = Result<T, UploadError>>,
    {
        let token = self.inner.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(UploadError::Canceled),
            res = work => res,
        };
        match outcome {
            Ok(value) => {
                if self.set_status(TransferStatus::Completed, None) {
                    logging::info_kv(
                        "transfer completed",
                        &[
                            ("transfer", self.id()),
                            ("bytes", &self.transferred_bytes().to_string()),
                        ],
                    );
                    Some(value)
                } else {
                    None
                }
            }
            Err(UploadError::Canceled) => {
                self.set_status(TransferStatus::Canceled, None);
                None
            }
            Err(err) => {
                let reason = err.to_string();
                logging::warn_kv(
                    "transfer failed",
                    &[("transfer", self.id()), ("error", &reason)],
                );
                self.set_status(TransferStatus::Failed, Some(reason));
                None
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<TransferEvent>,
    listeners: Arc<Listeners<dyn TransferListener>>,
) {
    while let Some(event) = rx.recv().await {
        for l in listeners.snapshot() {
            l.transfer_event(&event);
        }
    }
}
