use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop signal checked by every worker loop.
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}
