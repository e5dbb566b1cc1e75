//! Server-side sessions
//!
//! Each visitor gets an opaque identifier in the signed `session-id`
//! cookie; the data lives in a [`SessionStore`] and expires after its
//! `max_age` of inactivity. Handlers and the auth engine only touch the
//! data through [`SessionHandle`].

mod layer;
mod store;
pub mod token;

pub use layer::{SessionHandle, session_layer};
pub use store::{MemorySessionStore, SessionStore};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::auth::Identity;

/// Per-visitor session data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    /// Inactivity lifetime; "remember me" extends it
    pub max_age_secs: u64,
}

impl SessionData {
    pub fn new(max_age: Duration) -> Self {
        Self {
            user_id: None,
            user_email: None,
            max_age_secs: max_age.as_secs(),
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Identity recorded by an earlier successful sign-in
    pub fn identity(&self) -> Option<Identity> {
        self.user_id.as_ref().map(|id| Identity {
            id: id.clone(),
            email: self.user_email.clone(),
        })
    }
}

/// Session store failure
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store error: {0}")]
    Store(String),

    #[error("session signing error: {0}")]
    Signing(String),
}
