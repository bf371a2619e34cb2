use async_trait::async_trait;
use relaymx_session::{BackendId, Reply};

use crate::error::Result;

/// The client connection's view of the backend-facing protocol handler: send
/// a command to a backend and await its reply. Backend connection setup,
/// the backend wire protocol, and prepared-statement rewriting all live
/// behind this trait, out of scope here.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn send_and_await(&self, backend: BackendId, opcode: u8, payload: &[u8]) -> Result<Reply>;
}

/// Routes a query to a backend and exposes the backend set a session should
/// attach session-command replay cursors to. Backend selection, connection
/// pooling and failover live entirely behind this trait.
#[async_trait]
pub trait Router: Send + Sync {
    /// Route `query` for `session`, returning the backend that should handle it.
    async fn route_query(&self, session: SessionId, query: &[u8]) -> Result<BackendId>;

    /// Attach a newly available backend to `session`'s replay set.
    async fn attach(&self, session: SessionId, backend: BackendId) -> Result<()>;

    /// Detach a backend from `session`, e.g. on connection loss.
    async fn detach(&self, session: SessionId, backend: BackendId) -> Result<()>;
}

/// Classifies `COM_QUERY` text as session-modifying (and therefore subject
/// to session-command-list replay) or not.
pub trait QueryClassifier: Send + Sync {
    fn is_session_modifying(&self, query: &[u8]) -> bool;
}

/// Observes connection- and session-list-level events for metrics/logging,
/// decoupling the protocol handler from any particular metrics backend (per
/// the design notes' "injected observer" redesign of the ambient logging the
/// source relied on). Every method has a no-op default so an implementor
/// only overrides what it cares about.
pub trait ConnectionObserver: Send + Sync {
    fn auth_failed(&self) {}
    fn session_command_appended(&self) {}
    fn session_list_len(&self, _len: usize) {}
    fn replay_lag(&self, _commands_remaining: usize) {}
}

/// A [`ConnectionObserver`] that discards every event, the default when no
/// metrics backend is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

/// Looks up the `SHA1(SHA1(password))` hash `mysql_native_password`
/// verifies against. The full user/grant catalog is out of scope here; this
/// is the single method the handshake needs from it.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn lookup_password_sha1(&self, username: &[u8]) -> Result<Option<[u8; 20]>>;
}

/// Opaque client session handle; the proxy's connection id doubles as the
/// identifier the router and session command list key off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

/// A [`QueryClassifier`] recognizing the handful of statements that change
/// connection-scoped state: `SET`, `USE`, and transaction boundaries.
/// Supplements the fixed `COM_INIT_DB`/`COM_CHANGE_USER`/`COM_SET_OPTION`
/// opcodes, which are unconditionally session-modifying regardless of text.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl QueryClassifier for KeywordClassifier {
    fn is_session_modifying(&self, query: &[u8]) -> bool {
        let trimmed = leading_whitespace_trimmed(query);
        starts_with_keyword(trimmed, b"SET")
            || starts_with_keyword(trimmed, b"USE")
            || starts_with_keyword(trimmed, b"BEGIN")
            || starts_with_keyword(trimmed, b"START TRANSACTION")
    }
}

fn leading_whitespace_trimmed(query: &[u8]) -> &[u8] {
    let start = query.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(query.len());
    &query[start..]
}

fn starts_with_keyword(query: &[u8], keyword: &[u8]) -> bool {
    query.len() >= keyword.len() && query[..keyword.len()].eq_ignore_ascii_case(keyword)
}

/// A stub [`UserRepository`] over a fixed in-memory credential map, useful
/// for tests and as a default before a real catalog loader is wired in.
pub struct StaticUserRepository {
    users: std::collections::HashMap<Vec<u8>, [u8; 20]>,
}

impl StaticUserRepository {
    pub fn new() -> Self {
        Self { users: std::collections::HashMap::new() }
    }

    pub fn with_password(mut self, username: impl Into<Vec<u8>>, password: &[u8]) -> Self {
        use sha1::{Digest, Sha1};
        let stage1 = Sha1::digest(password);
        let stage2 = Sha1::digest(stage1);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&stage2);
        self.users.insert(username.into(), hash);
        self
    }

    /// Register a passwordless account: `lookup_password_sha1` returns the
    /// all-zero sentinel [`verify_and_recover`](crate::auth::verify_and_recover)'s
    /// caller treats as "no password required".
    pub fn with_no_password(mut self, username: impl Into<Vec<u8>>) -> Self {
        self.users.insert(username.into(), [0u8; 20]);
        self
    }
}

impl Default for StaticUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for StaticUserRepository {
    async fn lookup_password_sha1(&self, username: &[u8]) -> Result<Option<[u8; 20]>> {
        Ok(self.users.get(username).copied())
    }
}

/// A [`Router`] that always routes to a single fixed backend, useful for
/// tests and single-backend deployments.
pub struct SingleBackendRouter {
    backend: BackendId,
}

impl SingleBackendRouter {
    pub fn new(backend: BackendId) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Router for SingleBackendRouter {
    async fn route_query(&self, _session: SessionId, _query: &[u8]) -> Result<BackendId> {
        Ok(self.backend)
    }

    async fn attach(&self, _session: SessionId, _backend: BackendId) -> Result<()> {
        Ok(())
    }

    async fn detach(&self, _session: SessionId, _backend: BackendId) -> Result<()> {
        Ok(())
    }
}
