//! Ledger of optimistic mutations whose durable write is still outstanding.
//!
//! Each entry holds the pre-mutation value only until its write completes.
//! A remote snapshot for the same entity supersedes the entry: the write's
//! completion must then neither roll back nor re-apply anything.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::WriteOperation;
use crate::types::Task;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PendingKey {
    TaskPlacement(Uuid),
    TaskTitle(Uuid),
    /// Several task fields written together.
    TaskFields(Uuid),
    TaskRemoval(Uuid),
    StatusName(Uuid),
}

impl PendingKey {
    pub fn entity(self) -> Uuid {
        match self {
            PendingKey::TaskPlacement(id)
            | PendingKey::TaskTitle(id)
            | PendingKey::TaskFields(id)
            | PendingKey::TaskRemoval(id)
            | PendingKey::StatusName(id) => id,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Snapshot {
    Placement {
        status_id: Option<Uuid>,
        position: i64,
    },
    Title(String),
    StatusName(String),
    Task(Box<Task>),
    Removed(Box<Task>),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct WriteToken(u64);

impl std::fmt::Display for WriteToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    token: WriteToken,
    operation: WriteOperation,
    previous: Snapshot,
    superseded: bool,
}

/// What a finished write means for local state.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Settled {
    Confirmed,
    RollBack { key: PendingKey, previous: Snapshot },
    /// A remote snapshot already replaced the optimistic value.
    Superseded,
    /// A newer write took over the key, or the entity is gone.
    Stale,
}

#[derive(Debug, Default)]
pub struct PendingWrites {
    next_token: u64,
    entries: HashMap<PendingKey, PendingEntry>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an optimistic mutation. A newer write on the same key replaces
    /// the older entry, whose completion then settles as `Stale`.
    pub fn begin(
        &mut self,
        key: PendingKey,
        operation: WriteOperation,
        previous: Snapshot,
    ) -> WriteToken {
        let token = WriteToken(self.next_token);
        self.next_token += 1;
        self.entries.insert(
            key,
            PendingEntry {
                token,
                operation,
                previous,
                superseded: false,
            },
        );
        token
    }

    pub fn settle(&mut self, token: WriteToken, succeeded: bool) -> Settled {
        let Some(key) = self
            .entries
            .iter()
            .find(|(_, entry)| entry.token == token)
            .map(|(key, _)| *key)
        else {
            return Settled::Stale;
        };
        let Some(entry) = self.entries.remove(&key) else {
            return Settled::Stale;
        };

        match (succeeded, entry.superseded) {
            (_, true) => Settled::Superseded,
            (true, false) => Settled::Confirmed,
            (false, false) => Settled::RollBack {
                key,
                previous: entry.previous,
            },
        }
    }

    pub fn supersede_entity(&mut self, entity: Uuid) -> usize {
        let mut count = 0;
        for (key, entry) in self.entries.iter_mut() {
            if key.entity() == entity && !entry.superseded {
                entry.superseded = true;
                count += 1;
            }
        }
        count
    }

    pub fn supersede_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.superseded = true;
        }
    }

    pub fn forget_entity(&mut self, entity: Uuid) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.entity() != entity);
        before - self.entries.len()
    }

    pub fn is_pending(&self, entity: Uuid) -> bool {
        self.entries.keys().any(|key| key.entity() == entity)
    }

    pub fn operation(&self, key: PendingKey) -> Option<WriteOperation> {
        self.entries.get(&key).map(|entry| entry.operation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
