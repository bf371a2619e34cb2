use bytes::Bytes;

/// Identifies a backend connection attached to a [`crate::SessionCommandList`].
///
/// The router collaborator owns backend lifecycle; the session list only ever
/// sees this opaque handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub u64);

/// Monotonically increasing identifier assigned to a [`crate::SessionCommand`] at append time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

/// The three reply shapes the client protocol can forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ok,
    Err,
    Eof,
}

/// A captured backend reply: its classification plus the raw packet payload
/// the protocol handler will relay verbatim to the client.
#[derive(Debug, Clone)]
pub struct Reply {
    pub kind: ReplyKind,
    pub payload: Bytes,
}

impl Reply {
    pub fn ok(payload: Bytes) -> Self {
        Self { kind: ReplyKind::Ok, payload }
    }

    pub fn err(payload: Bytes) -> Self {
        Self { kind: ReplyKind::Err, payload }
    }

    pub fn eof(payload: Bytes) -> Self {
        Self { kind: ReplyKind::Eof, payload }
    }
}
