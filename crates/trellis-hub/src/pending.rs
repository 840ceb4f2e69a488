//! Single-slot pending request queue.
//!
//! The application may ask for a log before service discovery has finished.
//! One slot is enough: there is no reason to hold multiple distinct
//! requests, and a newer request supersedes an older one — overwriting is
//! defined behavior.

/// The pending-request slot. Owned by the hub supervisor.
#[derive(Debug, Default)]
pub struct PendingRequest {
    name: Option<String>,
}

impl PendingRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request until discovery completes. A newer request replaces
    /// an older one.
    pub fn store(&mut self, name: String) {
        if let Some(old) = &self.name {
            tracing::info!(old = %old, new = %name, "pending log request superseded");
        }
        self.name = Some(name);
    }

    /// Consume the parked request, if any.
    pub fn take(&mut self) -> Option<String> {
        self.name.take()
    }

    pub fn is_pending(&self) -> bool {
        self.name.is_some()
    }
}
