//! Listener registries.
//!
//! Dispatch always runs over a snapshot taken under the lock, so listeners
//! may add or remove listeners (including themselves) while being notified.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::request::IncomingRequest;
use crate::transfer::Transfer;

/// Observer of transfer lifecycle and incoming requests.
pub trait FileTransferListener: Send + Sync {
    fn transfer_created(&self, _transfer: &Transfer) {}

    fn request_received(&self, _request: &IncomingRequest) {}

    fn request_rejected(&self, _request: &IncomingRequest) {}
}

pub(crate) struct Listeners<L: ?Sized> {
    inner: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> Listeners<L> {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<L>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false if `listener` was already registered.
    pub(crate) fn add(&self, listener: Arc<L>) -> bool {
        let mut list = self.lock();
        if list.iter().any(|l| same(l, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    pub(crate) fn remove(&self, listener: &Arc<L>) -> bool {
        let mut list = self.lock();
        let before = list.len();
        list.retain(|l| !same(l, listener));
        list.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<L>> {
        self.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Listeners<dyn FileTransferListener>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn FileTransferListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FileTransferListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire_transfer_created(&self, transfer: &Transfer) {
        for l in self.listeners.snapshot() {
            l.transfer_created(transfer);
        }
    }

    pub fn fire_request_received(&self, request: &IncomingRequest) {
        for l in self.listeners.snapshot() {
            l.request_received(request);
        }
    }

    pub fn fire_request_rejected(&self, request: &IncomingRequest) {
        for l in self.listeners.snapshot() {
            l.request_rejected(request);
        }
    }
}
