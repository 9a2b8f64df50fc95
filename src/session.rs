//! Authentication lifecycle hooks.
//!
//! The auth layer reports sign-in and sign-out; the cache loads on the first
//! and tears everything down on the second. Signing in as a different user
//! while data for another user is cached clears that data first.

use crate::cache::SyncCache;
use crate::error::Result;
use tracing::info;

/// A change in authentication state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    SignedOut,
}

impl SyncCache {
    /// React to an authentication change.
    pub async fn handle_session(&self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::SignedIn { user_id } => {
                let previous = self.session_slot().replace(user_id.clone());
                if previous.as_deref().is_some_and(|prev| prev != user_id) {
                    info!(user = %user_id, "user switched, clearing cached collections");
                    self.cleanup();
                }
                self.initialize().await
            }
            SessionEvent::SignedOut => {
                self.session_slot().take();
                self.cleanup();
                Ok(())
            }
        }
    }

    /// User of the current session.
    pub fn session_user(&self) -> Option<String> {
        (*self.session_slot()).clone()
    }
}
