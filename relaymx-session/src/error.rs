use crate::types::BackendId;

#[derive(Debug, thiserror::Error)]
pub enum SclError {
    #[error("backend {0:?} is not attached to this session command list")]
    UnknownBackend(BackendId),

    #[error("backend {0:?} is already attached")]
    AlreadyAttached(BackendId),

    #[error("backend {0:?} has no outstanding command to advance")]
    NothingPending(BackendId),

    #[error("session command list is at capacity ({0} commands)")]
    CapacityExceeded(usize),

    #[error("session command list is poisoned by a divergent backend reply")]
    Poisoned,
}
