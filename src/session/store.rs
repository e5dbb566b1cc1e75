//! Session persistence

use axum::async_trait;
use moka::Expiry;
use moka::future::Cache;
use prometheus::IntGauge;
use std::time::{Duration, Instant};

use super::{SessionData, SessionError};

/// Session persistence capability
///
/// Writes are last-writer-wins per identifier.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a live session; reading renews its expiry
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError>;

    /// Create or overwrite a session
    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError>;

    /// Remove a session record
    async fn destroy(&self, id: &str) -> Result<(), SessionError>;
}

/// Every access pushes expiry `max_age` into the future
struct SlidingExpiry;

impl Expiry<String, SessionData> for SlidingExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &SessionData,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.max_age())
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &SessionData,
        _read_at: Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        Some(value.max_age())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &SessionData,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.max_age())
    }
}

/// In-memory session store (volatile, cleared on restart)
///
/// Uses Moka with a per-entry sliding expiry taken from each session's
/// `max_age`, so "remember me" sessions outlive ordinary ones.
pub struct MemorySessionStore {
    sessions: Cache<String, SessionData>,
    active: IntGauge,
}

impl MemorySessionStore {
    /// Create a store holding at most `max_sessions` sessions
    ///
    /// Its size is reported through [`crate::metrics::SESSIONS_ACTIVE`].
    pub fn new(max_sessions: u64) -> Self {
        Self::with_gauge(max_sessions, crate::metrics::SESSIONS_ACTIVE.clone())
    }

    /// Create a store reporting its size through `active`
    pub fn with_gauge(max_sessions: u64, active: IntGauge) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_sessions)
            .expire_after(SlidingExpiry)
            .build();

        Self { sessions, active }
    }

    /// Evict expired entries and publish the live count
    async fn refresh_gauge(&self) {
        self.sessions.run_pending_tasks().await;
        let live = i64::try_from(self.sessions.entry_count()).unwrap_or(i64::MAX);
        self.active.set(live);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        let data = self.sessions.get(id).await;
        if data.is_none() {
            self.refresh_gauge().await;
        }
        Ok(data)
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError> {
        self.sessions.insert(id.to_string(), data.clone()).await;
        self.refresh_gauge().await;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.invalidate(id).await;
        self.refresh_gauge().await;
        Ok(())
    }
}
