use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{self, ClientError, Session, SessionOptions};
use crate::config::Config;
use crate::session::{BoundConnector, ConnectionFactory, CredentialResolver, EstablishedConnection};
use crate::{Result, SqlMcpError};

pub type SessionId = Uuid;

#[derive(Clone)]
struct SessionEntry {
    id: SessionId,
    session: Arc<dyn Session>,
}

struct PoolShared {
    source: BoundConnector,
    /// Idle sessions, most recently returned last
    idle: Mutex<Vec<SessionEntry>>,
    /// Every live session the pool created, idle or checked out
    registry: Mutex<HashMap<SessionId, Arc<dyn Session>>>,
    created: AtomicU64,
    discarded: AtomicU64,
}

impl PoolShared {
    fn register(&self, session: Arc<dyn Session>) -> SessionEntry {
        let id = Uuid::new_v4();
        self.registry.lock().insert(id, session.clone());
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session = %id, created, "registered new session");
        SessionEntry { id, session }
    }

    /// Lock order is registry then idle, so a concurrent shutdown either
    /// sees the entry on the idle list or has already unregistered it.
    fn push_idle(&self, entry: SessionEntry) {
        let registry = self.registry.lock();
        if !registry.contains_key(&entry.id) {
            // torn down by shutdown while checked out
            debug!(session = %entry.id, "dropping session that is no longer registered");
            return;
        }
        self.idle.lock().push(entry);
    }

    fn discard(&self, entry: SessionEntry) {
        self.registry.lock().remove(&entry.id);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = entry.session.close() {
            warn!(session = %entry.id, "session close error: {}", e);
        }
        debug!(session = %entry.id, "discarded dead session");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub registered: usize,
    pub created: u64,
    pub discarded: u64,
}

/// Reusable authenticated sessions.
///
/// Sessions are created on demand and handed out one caller at a time.
/// Returning a session puts it back on the idle list instead of closing it;
/// a session that fails its liveness check when popped is discarded.
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

impl SessionPool {
    pub fn new(source: BoundConnector) -> Self {
        SessionPool {
            shared: Arc::new(PoolShared {
                source,
                idle: Mutex::new(Vec::new()),
                registry: Mutex::new(HashMap::new()),
                created: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Pool seeded with the session opened while probing credentials
    pub fn from_connection(connection: EstablishedConnection) -> Self {
        let pool = SessionPool::new(connection.connector);
        let entry = pool.shared.register(Arc::from(connection.session));
        pool.shared.idle.lock().push(entry);
        pool
    }

    /// Resolve credentials, connect to the configured endpoint and build the pool
    pub fn connect(config: &Config) -> Result<Self> {
        let candidates = CredentialResolver::from_config(config).resolve()?;
        let connector = client::connector_for(&config.connection)?;
        let options = SessionOptions {
            label: config.connection_label.clone(),
            connect_timeout: config.connection_timeout_duration(),
            keep_alive: true,
        };
        let connection = ConnectionFactory::new(connector, options).establish(&candidates)?;
        Ok(SessionPool::from_connection(connection))
    }

    /// Check out a session: reuse an idle one that is still alive, otherwise
    /// open a new one.
    pub fn acquire(&self) -> Result<PooledSession> {
        loop {
            let entry = self.shared.idle.lock().pop();
            let Some(entry) = entry else { break };
            if entry.session.is_alive() {
                return Ok(PooledSession::new(entry, self.shared.clone()));
            }
            self.shared.discard(entry);
        }

        let session = self
            .shared
            .source
            .open_session()
            .map_err(SqlMcpError::Connection)?;
        let entry = self.shared.register(Arc::from(session));
        Ok(PooledSession::new(entry, self.shared.clone()))
    }

    /// Tear down every session the pool created, idle or checked out.
    /// Idempotent; individual failures are logged.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = {
            let mut registry = self.shared.registry.lock();
            self.shared.idle.lock().clear();
            registry.drain().collect()
        };
        if sessions.is_empty() {
            return;
        }

        let (mut closed, mut errors) = (0, 0);
        for (id, session) in sessions {
            match session.close() {
                Ok(()) => closed += 1,
                Err(e) => {
                    warn!(session = %id, "session close error: {}", e);
                    errors += 1;
                }
            }
        }
        info!("SessionPool closed. session={}, error={}", closed, errors);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.shared.idle.lock().len(),
            registered: self.shared.registry.lock().len(),
            created: self.shared.created.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn credential_kind(&self) -> &'static str {
        self.shared.source.credential().kind()
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A checked-out session.
///
/// `release` hands it back for reuse, `close` tears the connection down.
/// Dropping without either releases it.
pub struct PooledSession {
    entry: SessionEntry,
    shared: Arc<PoolShared>,
    returned: bool,
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.entry.id)
            .finish_non_exhaustive()
    }
}

impl PooledSession {
    fn new(entry: SessionEntry, shared: Arc<PoolShared>) -> Self {
        PooledSession {
            entry,
            shared,
            returned: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.entry.id
    }

    pub fn release(mut self) {
        self.returned = true;
        self.shared.push_idle(self.entry.clone());
    }

    pub fn close(mut self) -> std::result::Result<(), ClientError> {
        self.returned = true;
        self.shared.registry.lock().remove(&self.entry.id);
        self.entry.session.close()
    }
}

impl Deref for PooledSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.entry.session.as_ref()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if !self.returned {
            self.shared.push_idle(self.entry.clone());
        }
    }
}
