use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::{error::Result, request::AuthorizeRequest};

/// Default lifetime of an issued authorization code.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(600);

/// The authorize-time context bound to an issued code.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeSession {
    pub request_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: BTreeSet<String>,
    pub granted_scopes: BTreeSet<String>,
    pub subject: Option<String>,
    pub nonce: Option<String>,
    pub response_types: BTreeSet<String>,
    pub extra: BTreeMap<String, String>,
}

impl From<&AuthorizeRequest> for CodeSession {
    fn from(request: &AuthorizeRequest) -> Self {
        CodeSession {
            request_id: request.id.clone(),
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scopes: request.scopes.clone(),
            granted_scopes: request.granted_scopes.clone(),
            subject: request.subject.clone(),
            nonce: request.nonce.clone(),
            response_types: request.response_types.clone(),
            extra: request.extra.clone(),
        }
    }
}

/// Durable mapping from an issued code to its authorize-time context.
///
/// Every operation is a single atomic call against the backing store;
/// callers never hold a lock across calls.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, code: &str, session: CodeSession) -> Result<()>;

    async fn get_session(&self, code: &str) -> Result<Option<CodeSession>>;

    /// Delete the session for `code`. Deleting an absent session is a no-op.
    async fn delete_session(&self, code: &str) -> Result<()>;

    /// Delete every session created for the given authorize request.
    async fn delete_sessions_for_request(&self, request_id: &str) -> Result<()>;

    /// Read and delete the session for `code`. Stores that can do this
    /// atomically should override the default.
    async fn take_session(&self, code: &str) -> Result<Option<CodeSession>> {
        let session = self.get_session(code).await?;
        if session.is_some() {
            self.delete_session(code).await?;
        }
        Ok(session)
    }
}

#[derive(Debug)]
struct StoredSession {
    session: CodeSession,
    expires_at: Instant,
}

/// In-process session store backed by a concurrent map.
///
/// Expired sessions are swept on insert, at most once per TTL, so codes
/// that are never redeemed do not accumulate.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: DashMap<String, StoredSession>,
    ttl: Duration,
    next_sweep: Mutex<Instant>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CODE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            next_sweep: Mutex::new(Instant::now() + ttl),
        }
    }

    /// Number of sessions currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every expired session.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.sessions.retain(|_, stored| stored.expires_at > now);
    }

    fn sweep_if_due(&self, now: Instant) {
        // A sweep already running elsewhere covers this insert.
        let Ok(mut next) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next {
            return;
        }
        *next = now + self.ttl;
        drop(next);

        let before = self.sessions.len();
        self.sessions.retain(|_, stored| stored.expires_at > now);
        debug!(
            "Swept {} expired code sessions",
            before.saturating_sub(self.sessions.len())
        );
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, code: &str, session: CodeSession) -> Result<()> {
        debug!("Creating code session for request {}", session.request_id);
        let now = Instant::now();
        self.sweep_if_due(now);
        self.sessions.insert(
            code.to_string(),
            StoredSession {
                session,
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn get_session(&self, code: &str) -> Result<Option<CodeSession>> {
        let now = Instant::now();
        let expired = match self.sessions.get(code) {
            Some(stored) if stored.expires_at > now => return Ok(Some(stored.session.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions
                .remove_if(code, |_, stored| stored.expires_at <= now);
        }
        Ok(None)
    }

    async fn delete_session(&self, code: &str) -> Result<()> {
        self.sessions.remove(code);
        Ok(())
    }

    async fn delete_sessions_for_request(&self, request_id: &str) -> Result<()> {
        self.sessions
            .retain(|_, stored| stored.session.request_id != request_id);
        Ok(())
    }

    async fn take_session(&self, code: &str) -> Result<Option<CodeSession>> {
        let now = Instant::now();
        Ok(self
            .sessions
            .remove(code)
            .filter(|(_, stored)| stored.expires_at > now)
            .map(|(_, stored)| stored.session))
    }
}
