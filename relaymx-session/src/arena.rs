use std::sync::Arc;

use crate::command::SessionCommand;

/// A tombstoned slot: an evicted command clears its payload but keeps its
/// index, so a `Cursor`'s bare `usize` position stays valid across eviction
/// instead of needing to be patched.
#[derive(Default)]
struct Slot {
    command: Option<Arc<SessionCommand>>,
}

/// Append-only backing store for [`SessionCommand`]s, replacing the
/// original's intrusive pointer-linked list with a `Vec` indexed by a
/// `Cursor`'s `position`. Indices are never reused for a new command; an
/// evicted slot is tombstoned in place (`command` cleared) rather than
/// removed, which is what makes a lagging cursor's stale `position` return
/// `None` from [`Arena::get`] instead of silently reading an unrelated
/// command. `SessionCommandList::skip_cursors_past` fast-forwards any
/// cursor left pointing at a tombstoned slot after a forced eviction.
#[derive(Default)]
pub struct Arena {
    slots: Vec<Slot>,
    /// Smallest index not yet evicted.
    pub evicted_upto: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self { slots: Vec::new(), evicted_upto: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.evicted_upto
    }

    pub fn push(&mut self, command: Arc<SessionCommand>) {
        self.slots.push(Slot { command: Some(command) });
    }

    /// Fetch the command at `index`, if the slot hasn't been evicted.
    pub fn get(&self, index: usize) -> Option<Arc<SessionCommand>> {
        self.slots.get(index).and_then(|s| s.command.clone())
    }

    /// Evict every slot below `up_to` (exclusive), clearing its payload.
    pub fn evict_before(&mut self, up_to: usize) {
        let up_to = up_to.min(self.slots.len());
        for idx in self.evicted_upto..up_to {
            self.slots[idx].command = None;
        }
        self.evicted_upto = self.evicted_upto.max(up_to);
    }
}
