//! Pause gate awaited at every stage boundary

use tokio::sync::watch;

/// Open/closed gate backed by a watch channel.
///
/// Waiters park on the channel until the gate is reopened; nothing polls.
#[derive(Debug)]
pub struct PauseGate {
    open: watch::Sender<bool>,
}

impl PauseGate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Return once the gate is open
    pub async fn wait(&self) {
        let mut receiver = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = receiver.wait_for(|open| *open).await;
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
