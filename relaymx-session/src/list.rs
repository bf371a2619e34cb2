use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::arena::Arena;
use crate::command::SessionCommand;
use crate::cursor::Cursor;
use crate::error::SclError;
use crate::semantics::{OnMaxLenError, Properties, Semantics};
use crate::types::{BackendId, CommandId, Reply};

/// Result of attaching a backend to the list.
pub struct AttachOutcome {
    /// True if the backend has history to replay before it can join the live pool.
    pub needs_replay: bool,
}

/// Result of folding a backend's reply to its current command.
pub struct AdvanceOutcome {
    /// The reply to relay to the client now, if this call settles it.
    pub to_forward: Option<Reply>,
    /// True if the cursor just caught up and joined the live pool.
    pub entered_live: bool,
    /// True if this reply disagreed with an already-forwarded reply and the
    /// list's `on_error` policy poisoned the session.
    pub poisoned: bool,
}

/// Ordered, append-only journal of session-modifying commands replayed to
/// every backend attached to a client session.
///
/// Locking discipline: the list lock (`inner`) guards the arena and is held
/// only for append/evict bookkeeping; each backend's `Cursor` has its own
/// lock inside `cursors`; each [`SessionCommand`]'s reply bookkeeping has its
/// own lock. A caller never holds a coarser lock while acquiring a finer one
/// out of order.
pub struct SessionCommandList {
    inner: RwLock<Arena>,
    cursors: DashMap<BackendId, Mutex<Cursor>>,
    next_id: AtomicU64,
    poisoned: AtomicBool,
    semantics: Semantics,
    properties: Properties,
}

impl SessionCommandList {
    pub fn new(semantics: Semantics, properties: Properties) -> Self {
        Self {
            inner: RwLock::new(Arena::new()),
            cursors: DashMap::new(),
            next_id: AtomicU64::new(0),
            poisoned: AtomicBool::new(false),
            semantics,
            properties,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Append a session-modifying command, dispatching it to every backend
    /// currently in the live pool (those not mid-replay).
    ///
    /// Commands are retained indefinitely by default: a command is never
    /// evicted just because the cursors attached *right now* have already
    /// passed it, since a backend that attaches later still needs to replay
    /// it. The only source of eviction is `max_len` pressure, below.
    pub fn append(&self, opcode: u8, payload: Bytes) -> Result<Arc<SessionCommand>, SclError> {
        let mut arena = self.inner.write();

        if self.properties.max_len > 0 && arena.live_count() >= self.properties.max_len {
            match self.properties.on_mlen_err {
                OnMaxLenError::RejectNew => return Err(SclError::CapacityExceeded(self.properties.max_len)),
                OnMaxLenError::DropFirst => {
                    let target = arena.evicted_upto + 1;
                    arena.evict_before(target);
                    self.skip_cursors_past(target);
                }
            }
        }

        let id = CommandId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let new_index = arena.len();

        let mut live: HashSet<BackendId> = HashSet::new();
        for entry in self.cursors.iter() {
            let mut cursor = entry.value().lock();
            if !cursor.replaying {
                live.insert(cursor.backend);
                cursor.position = new_index;
            }
        }

        let command = Arc::new(SessionCommand::new(id, opcode, payload, live));
        arena.push(command.clone());
        Ok(command)
    }

    /// Attach a backend to the list. Idempotent: re-attaching an already
    /// attached backend is a no-op that reports its current replay state.
    pub fn attach(&self, backend: BackendId) -> AttachOutcome {
        let arena = self.inner.read();
        let entry = self.cursors.entry(backend).or_insert_with(|| {
            Mutex::new(Cursor::new(backend, arena.evicted_upto, arena.len()))
        });
        let needs_replay = entry.lock().replaying;
        AttachOutcome { needs_replay }
    }

    /// Detach a backend, releasing its cursor.
    pub fn detach(&self, backend: BackendId) {
        self.cursors.remove(&backend);
    }

    /// The command `backend`'s cursor is currently positioned at, if it still
    /// has history to replay. `None` means the backend is in the live pool
    /// with nothing outstanding.
    pub fn current_for_replay(&self, backend: BackendId) -> Result<Option<Arc<SessionCommand>>, SclError> {
        let entry = self.cursors.get(&backend).ok_or(SclError::UnknownBackend(backend))?;
        let cursor = entry.lock();
        if !cursor.replaying {
            return Ok(None);
        }
        let arena = self.inner.read();
        Ok(arena.get(cursor.position))
    }

    /// Fold a reply from `backend` into the command its cursor currently
    /// points at, advancing the cursor afterward.
    pub fn advance(&self, backend: BackendId, reply: Reply) -> Result<AdvanceOutcome, SclError> {
        let entry = self.cursors.get(&backend).ok_or(SclError::UnknownBackend(backend))?;
        let mut cursor = entry.lock();

        let arena = self.inner.read();
        if cursor.position >= arena.len() {
            return Err(SclError::NothingPending(backend));
        }
        let command = arena.get(cursor.position).ok_or(SclError::NothingPending(backend))?;
        drop(arena);

        let was_replaying = cursor.replaying;
        let outcome = command.fold_reply(backend, reply, self.semantics);

        if outcome.divergent {
            match self.semantics.on_error {
                crate::semantics::OnError::Abort => {
                    self.poisoned.store(true, Ordering::Release);
                    tracing::warn!(backend = backend.0, command = command.id.0, "divergent backend reply, poisoning session");
                }
                crate::semantics::OnError::Drop => {
                    tracing::debug!(backend = backend.0, command = command.id.0, "dropping divergent backend reply");
                }
            }
        }

        cursor.position += 1;
        let arena_len = self.inner.read().len();
        let entered_live = was_replaying && cursor.position >= arena_len;
        if entered_live {
            cursor.replaying = false;
        }
        drop(cursor);

        Ok(AdvanceOutcome {
            to_forward: if was_replaying { None } else { outcome.to_forward },
            entered_live,
            poisoned: outcome.divergent && matches!(self.semantics.on_error, crate::semantics::OnError::Abort),
        })
    }

    /// After a forced eviction, any cursor still pointing below `target` has
    /// lost the command it was about to replay; fast-forward it past the
    /// gap rather than leaving it stuck on a tombstoned slot.
    fn skip_cursors_past(&self, target: usize) {
        let arena_len = self.inner.read().len();
        for entry in self.cursors.iter() {
            let mut cursor = entry.value().lock();
            if cursor.position < target {
                tracing::warn!(
                    backend = cursor.backend.0,
                    skipped_to = target,
                    "backend cursor skipped past a command evicted under capacity pressure"
                );
                cursor.position = target;
                cursor.replaying = cursor.position < arena_len;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().live_count()
    }
}
