//! Bounded ring of recent error reports.
//!
//! The daemon's log layer pushes every ERROR event here; the control API
//! reads it back. Oldest entries are evicted first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RecentErrors {
    entries: Arc<Mutex<VecDeque<ErrorEntry>>>,
    capacity: usize,
}

impl RecentErrors {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, target: impl Into<String>, message: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(ErrorEntry {
            timestamp,
            target: target.into(),
            message: message.into(),
        });
    }

    /// Entries oldest first.
    pub fn snapshot(&self) -> Vec<ErrorEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for RecentErrors {
    fn default() -> Self {
        Self::new(100)
    }
}
