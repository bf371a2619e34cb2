/// Which reply a multi-backend command resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOn {
    /// Forward the first reply received; later replies are bookkeeping only.
    First,
    /// Forward the last reply received, once every expected backend has replied.
    Last,
    /// Forward OK once every expected backend replied OK; otherwise forward the first ERR seen.
    AllOk,
}

/// How many backend replies are required before a command is considered settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MustReply {
    /// Settle as soon as one backend has replied.
    One,
    /// Settle only once every backend that was dispatched the command has replied.
    All,
}

/// What happens when a backend's reply disagrees with the reply already forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Log and discard the divergent reply; the session continues.
    Drop,
    /// Poison the session command list; the connection handler tears down the session.
    Abort,
}

/// What happens when `max_len` is reached and a new command is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMaxLenError {
    /// Evict the oldest command even if a lagging cursor still references it.
    DropFirst,
    /// Reject the append.
    RejectNew,
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct Semantics {
    pub reply_on: ReplyOn,
    pub must_reply: MustReply,
    pub on_error: OnError,
}

impl Default for Semantics {
    fn default() -> Self {
        Self { reply_on: ReplyOn::First, must_reply: MustReply::One, on_error: OnError::Abort }
    }
}

/// Capacity policy for the list. `max_len == 0` means unbounded.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct Properties {
    pub max_len: usize,
    pub on_mlen_err: OnMaxLenError,
}

impl Default for Properties {
    fn default() -> Self {
        Self { max_len: 0, on_mlen_err: OnMaxLenError::RejectNew }
    }
}
