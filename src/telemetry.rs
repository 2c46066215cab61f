use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

#[derive(Default)]
pub struct HttpStats {
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl HttpStats {
    pub fn on_send(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn on_recv(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.bytes_recv.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_last_error(&self, err: impl ToString) {
        let mut g = self.last_error.lock().unwrap_or_else(PoisonError::into_inner);
        *g = Some(err.to_string());
    }

    pub fn snapshot(&self) -> HttpStatsSnapshot {
        let last_error = self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default();
        HttpStatsSnapshot {
            bytes_sent_total: self.bytes_sent.load(Ordering::Relaxed),
            bytes_recv_total: self.bytes_recv.load(Ordering::Relaxed),
            last_error,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HttpStatsSnapshot {
    pub bytes_sent_total: u64,
    pub bytes_recv_total: u64,
    pub last_error: String,
}
