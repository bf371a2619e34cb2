#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    Protocol(String),

    #[error("authentication failed for user {0:?}")]
    Auth(String),

    #[error("session command list error: {0}")]
    Session(#[from] relaymx_session::SclError),

    #[error("no backend available to route query")]
    NoBackend,

    #[error("session poisoned by a divergent backend reply")]
    Poisoned,

    #[error("access denied for user {0:?}")]
    AccessDenied(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
