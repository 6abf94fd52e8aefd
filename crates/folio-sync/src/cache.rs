//! # Page Cache
//!
//! The single place where the current view lives.
//!
//! ## Epoch Guard
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Last Request Wins                                │
//! │                                                                         │
//! │  query(Q1) ──► next_epoch() = 1 ──► fetch ─────────────────┐           │
//! │  query(Q2) ──► next_epoch() = 2 ──► fetch ──┐               │           │
//! │                                             ▼               │           │
//! │                          try_replace(2, R2) = true          │           │
//! │                                                             ▼           │
//! │                                      try_replace(1, R1) = false         │
//! │                                                                         │
//! │  A result is adopted only if no newer request was issued while it      │
//! │  was in flight. Late results are dropped without a trace.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All state sits behind one mutex. Readers get a snapshot; nothing is held
//! across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use folio_core::{PageRequest, PageResult};

/// Snapshot of the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    /// The most recent query intent.
    pub last_request: Option<PageRequest>,

    /// The most recent adopted page.
    pub last_result: Option<Arc<PageResult>>,

    /// Epoch of `last_request`.
    pub request_epoch: u64,

    /// Epoch of the request that produced `last_result`.
    pub result_epoch: u64,
}

impl CacheEntry {
    /// Returns true if the adopted result answers the latest request.
    pub fn is_current(&self) -> bool {
        self.last_result.is_some() && self.result_epoch == self.request_epoch
    }
}

/// Epoch-guarded holder of the latest request and result.
#[derive(Debug, Default)]
pub struct PageCache {
    inner: Mutex<CacheEntry>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the current entry.
    pub fn read(&self) -> CacheEntry {
        self.lock().clone()
    }

    /// Records `request` as the latest intent and returns its epoch.
    ///
    /// Epochs start at 1 and never repeat.
    pub fn next_epoch(&self, request: PageRequest) -> u64 {
        let mut entry = self.lock();
        entry.request_epoch += 1;
        entry.last_request = Some(request);
        entry.request_epoch
    }

    /// Adopts `result` if `epoch` is still the latest.
    ///
    /// Returns whether the result was adopted.
    pub fn try_replace(&self, epoch: u64, result: Arc<PageResult>) -> bool {
        self.try_replace_with(epoch, result, |_| {})
    }

    /// Like [`try_replace`](Self::try_replace), running `on_accept` while the
    /// lock is still held.
    ///
    /// Anything done in `on_accept` is ordered by epoch with respect to every
    /// other adoption. It must not block.
    pub fn try_replace_with<F>(&self, epoch: u64, result: Arc<PageResult>, on_accept: F) -> bool
    where
        F: FnOnce(&Arc<PageResult>),
    {
        let mut entry = self.lock();
        if epoch != entry.request_epoch {
            return false;
        }
        on_accept(&result);
        entry.last_result = Some(result);
        entry.result_epoch = epoch;
        true
    }

    /// Latest request and its epoch, if any request was made.
    pub fn current_request(&self) -> Option<(u64, PageRequest)> {
        let entry = self.lock();
        entry
            .last_request
            .clone()
            .map(|request| (entry.request_epoch, request))
    }

    fn lock(&self) -> MutexGuard<'_, CacheEntry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
