//! Authentication
//!
//! Handles:
//! - Reconciling provider cookies, the session and email-link proofs
//! - Login, registration, logout and password recovery transactions
//! - Authentication middleware

pub mod engine;
pub mod events;
mod failure;
pub mod forms;
mod handlers;
mod middleware;
pub mod pkce;

pub use engine::{AuthEngine, Identity, OneTimeProof, Reconciliation, Verdict};
pub use handlers::{DASHBOARD_PATH, LOGIN_PATH, auth_router};
pub use middleware::{CurrentUser, MaybeUser, require_auth};
