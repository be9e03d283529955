//! Progress reporting and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};

/// Receives progress of an `apply()` run.
///
/// Calls happen at tile granularity and may come from worker threads;
/// implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn set_percentage(&self, percentage: f64);

    fn set_text(&self, text: &str);

    /// Polled before every tile and by operators inside long tiles
    fn is_canceled(&self) -> bool {
        false
    }

    /// An output raster was completely written
    fn file_created(&self, _filename: &str) {}
}

/// Sink that only carries a cancellation flag
#[derive(Debug, Default)]
pub struct CancelFlag {
    canceled: AtomicBool,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl ProgressSink for CancelFlag {
    fn set_percentage(&self, _percentage: f64) {}

    fn set_text(&self, _text: &str) {}

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}
