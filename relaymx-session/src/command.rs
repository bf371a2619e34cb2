use std::collections::HashSet;

use parking_lot::Mutex;

use crate::semantics::{ReplyOn, Semantics};
use crate::types::{BackendId, CommandId, Reply, ReplyKind};

/// A single session-modifying command recorded on the list.
///
/// `state` is behind its own mutex so that concurrent `advance()` calls from
/// different backend tasks never contend on the list lock or on each other's
/// unrelated commands (list-lock -> cursor-lock -> command-lock ordering).
#[derive(Debug)]
pub struct SessionCommand {
    pub id: CommandId,
    pub opcode: u8,
    pub payload: bytes::Bytes,
    state: Mutex<CommandState>,
}

#[derive(Debug)]
struct CommandState {
    /// Backends this command has been dispatched to: the live set at append
    /// time, plus any backend that later replays it after a late attach.
    dispatched_to: HashSet<BackendId>,
    n_replied: usize,
    first_reply: Option<Reply>,
    last_reply: Option<Reply>,
    all_ok: bool,
    first_err: Option<Reply>,
    forwarded: Option<ReplyKind>,
}

impl Default for CommandState {
    fn default() -> Self {
        Self {
            dispatched_to: HashSet::new(),
            n_replied: 0,
            first_reply: None,
            last_reply: None,
            all_ok: true,
            first_err: None,
            forwarded: None,
        }
    }
}

/// Outcome of folding one backend's reply into a command's bookkeeping.
pub struct FoldOutcome {
    /// The reply to relay to the client, if this call is the one that settles it.
    pub to_forward: Option<Reply>,
    /// True if this reply disagreed with a reply already forwarded for this command.
    pub divergent: bool,
}

impl SessionCommand {
    pub fn new(id: CommandId, opcode: u8, payload: bytes::Bytes, dispatched_to: HashSet<BackendId>) -> Self {
        Self {
            id,
            opcode,
            payload,
            state: Mutex::new(CommandState { dispatched_to, ..CommandState::default() }),
        }
    }

    /// Record a backend as a recipient of this command without a reply yet,
    /// used when a late-attaching backend begins replaying it.
    pub fn register_recipient(&self, backend: BackendId) {
        self.state.lock().dispatched_to.insert(backend);
    }

    /// The canonical reply already decided for this command, if any.
    pub fn canonical_reply(&self) -> Option<Reply> {
        let guard = self.state.lock();
        match guard.forwarded {
            Some(ReplyKind::Ok) | Some(ReplyKind::Eof) => guard.first_reply.clone().or_else(|| guard.last_reply.clone()),
            Some(ReplyKind::Err) => guard.first_err.clone(),
            None => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        let guard = self.state.lock();
        guard.n_replied >= guard.dispatched_to.len() && !guard.dispatched_to.is_empty()
    }

    /// Fold `reply` from `backend` into this command's bookkeeping and decide
    /// whether it settles the command, per `semantics`.
    pub fn fold_reply(&self, backend: BackendId, reply: Reply, semantics: Semantics) -> FoldOutcome {
        let mut guard = self.state.lock();
        guard.dispatched_to.insert(backend);
        guard.n_replied += 1;

        if !matches!(reply.kind, ReplyKind::Ok | ReplyKind::Eof) {
            guard.all_ok = false;
            if guard.first_err.is_none() {
                guard.first_err = Some(reply.clone());
            }
        }
        if guard.first_reply.is_none() {
            guard.first_reply = Some(reply.clone());
        }
        guard.last_reply = Some(reply.clone());

        let settled_now = guard.n_replied >= guard.dispatched_to.len();
        let was_forwarded = guard.forwarded.is_some();

        let divergent = was_forwarded
            && matches!(guard.forwarded, Some(ReplyKind::Ok) | Some(ReplyKind::Eof))
            && matches!(reply.kind, ReplyKind::Err);

        if was_forwarded {
            return FoldOutcome { to_forward: None, divergent };
        }

        // `reply_on` decides *when* the canonical reply is known, not
        // `must_reply`: `First` is knowable off the very first reply, so it
        // forwards immediately and `must_reply` only affects how long the
        // command stays live for eviction purposes afterward. `Last` and
        // `AllOk` can't be decided until every dispatched backend has
        // replied.
        let ready = match semantics.reply_on {
            ReplyOn::First => true,
            ReplyOn::Last | ReplyOn::AllOk => settled_now,
        };
        if !ready {
            return FoldOutcome { to_forward: None, divergent: false };
        }

        let canonical = match semantics.reply_on {
            ReplyOn::First => guard.first_reply.clone(),
            ReplyOn::Last => guard.last_reply.clone(),
            ReplyOn::AllOk => {
                if guard.all_ok {
                    guard.first_reply.clone()
                } else {
                    guard.first_err.clone()
                }
            }
        };
        guard.forwarded = canonical.as_ref().map(|r| r.kind);
        FoldOutcome { to_forward: canonical, divergent: false }
    }
}
