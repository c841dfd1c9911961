//! Render-ready board model and the controllers that mutate it.
//!
//! Bucket membership is always derived from each task's status reference;
//! the board only owns presentation order inside a bucket.

pub mod drag;
pub mod edit;
pub mod pending;
pub mod reconcile;

use std::collections::HashMap;

use uuid::Uuid;

use crate::types::{Status, Task};

/// Gap left between appended tasks so later drops can land between them.
pub const POSITION_STEP: i64 = 1024;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Bucket {
    Status(Uuid),
    Unassigned,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Placement {
    Before,
    After,
}

#[derive(Debug)]
pub struct Column<'a> {
    pub status: &'a Status,
    pub tasks: Vec<&'a Task>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct TaskEntry {
    task: Task,
    seq: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Board {
    project_id: Uuid,
    statuses: HashMap<Uuid, Status>,
    tasks: HashMap<Uuid, TaskEntry>,
    next_seq: u64,
}

impl Board {
    pub fn new(project_id: Uuid) -> Self {
        Self {
            project_id,
            statuses: HashMap::new(),
            tasks: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Builds a board from fetched collections. Fetch order becomes the
    /// tie-breaker for tasks sharing a position.
    pub fn from_snapshot(project_id: Uuid, statuses: Vec<Status>, tasks: Vec<Task>) -> Self {
        let mut board = Self::new(project_id);
        board.replace_all(statuses, tasks);
        board
    }

    pub fn replace_all(&mut self, statuses: Vec<Status>, tasks: Vec<Task>) {
        self.statuses.clear();
        self.tasks.clear();
        self.next_seq = 0;
        for status in statuses {
            self.upsert_status(status);
        }
        for task in tasks {
            self.upsert_task(task);
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn status(&self, id: Uuid) -> Option<&Status> {
        self.statuses.get(&id)
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id).map(|entry| &entry.task)
    }

    pub fn contains_task(&self, id: Uuid) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn status_count(&self) -> usize {
        self.statuses.len()
    }

    /// Statuses in left-to-right order, independent of fetch or event order.
    pub fn all_statuses(&self) -> Vec<&Status> {
        let mut statuses = self.statuses.values().collect::<Vec<_>>();
        statuses.sort_by_key(|status| (status.position, status.id));
        statuses
    }

    pub fn status_by_name(&self, name: &str) -> Option<&Status> {
        let needle = name.trim();
        self.all_statuses()
            .into_iter()
            .find(|status| status.name.eq_ignore_ascii_case(needle))
    }

    pub fn bucket_of(&self, task: &Task) -> Bucket {
        match task.status_id {
            Some(status_id) if self.statuses.contains_key(&status_id) => Bucket::Status(status_id),
            _ => Bucket::Unassigned,
        }
    }

    pub fn tasks_in_status(&self, status_id: Uuid) -> Vec<&Task> {
        if !self.statuses.contains_key(&status_id) {
            return Vec::new();
        }
        self.bucket(Bucket::Status(status_id))
    }

    pub fn unassigned(&self) -> Vec<&Task> {
        self.bucket(Bucket::Unassigned)
    }

    pub fn columns(&self) -> Vec<Column<'_>> {
        self.all_statuses()
            .into_iter()
            .map(|status| Column {
                status,
                tasks: self.tasks_in_status(status.id),
            })
            .collect()
    }

    fn bucket(&self, bucket: Bucket) -> Vec<&Task> {
        let mut entries = self
            .tasks
            .values()
            .filter(|entry| self.bucket_of(&entry.task) == bucket)
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| (entry.task.position, entry.seq));
        entries.into_iter().map(|entry| &entry.task).collect()
    }

    /// Inserts or overwrites a task snapshot. Returns `true` on insert.
    pub fn upsert_task(&mut self, task: Task) -> bool {
        match self.tasks.get_mut(&task.id) {
            Some(entry) => {
                entry.task = task;
                false
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.tasks.insert(task.id, TaskEntry { task, seq });
                true
            }
        }
    }

    pub fn remove_task(&mut self, id: Uuid) -> Option<Task> {
        self.tasks.remove(&id).map(|entry| entry.task)
    }

    /// Inserts or overwrites a status. Returns `true` on insert.
    pub fn upsert_status(&mut self, status: Status) -> bool {
        self.statuses.insert(status.id, status).is_none()
    }

    pub fn set_task_placement(&mut self, id: Uuid, status_id: Option<Uuid>, position: i64) -> bool {
        self.set_task_status(id, status_id) && self.set_task_position(id, position)
    }

    pub fn set_task_status(&mut self, id: Uuid, status_id: Option<Uuid>) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        entry.task.status_id = status_id;
        true
    }

    pub fn set_task_position(&mut self, id: Uuid, position: i64) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        entry.task.position = position;
        true
    }

    pub fn set_task_title(&mut self, id: Uuid, title: impl Into<String>) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        entry.task.title = title.into();
        true
    }

    pub fn set_status_name(&mut self, id: Uuid, name: impl Into<String>) -> bool {
        let Some(status) = self.statuses.get_mut(&id) else {
            return false;
        };
        status.name = name.into();
        true
    }

    /// Position for a task dropped into `status_id`, either appended or
    /// placed next to `anchor`. The moving task is ignored when looking at
    /// neighbours. Without an integer gap the anchor's own position is reused
    /// and arrival order settles the tie.
    pub fn position_for_drop(
        &self,
        status_id: Uuid,
        anchor: Option<(Uuid, Placement)>,
        moving: Uuid,
    ) -> i64 {
        let siblings = self
            .tasks_in_status(status_id)
            .into_iter()
            .filter(|task| task.id != moving)
            .collect::<Vec<_>>();

        let append = || {
            siblings
                .last()
                .map(|last| last.position.saturating_add(POSITION_STEP))
                .unwrap_or(0)
        };

        let Some((anchor_id, placement)) = anchor else {
            return append();
        };
        let Some(index) = siblings.iter().position(|task| task.id == anchor_id) else {
            return append();
        };
        let anchor_position = siblings[index].position;

        let neighbour = match placement {
            Placement::Before => index.checked_sub(1).map(|prev| siblings[prev].position),
            Placement::After => siblings.get(index + 1).map(|next| next.position),
        };

        match (placement, neighbour) {
            (Placement::Before, None) => anchor_position.saturating_sub(POSITION_STEP),
            (Placement::After, None) => anchor_position.saturating_add(POSITION_STEP),
            (Placement::Before, Some(prev)) => midpoint(prev, anchor_position),
            (Placement::After, Some(next)) => midpoint(anchor_position, next),
        }
    }

    /// Verifies that every task sits in exactly one bucket.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen: HashMap<Uuid, usize> = HashMap::new();
        for status in self.all_statuses() {
            for task in self.tasks_in_status(status.id) {
                *seen.entry(task.id).or_default() += 1;
            }
        }
        for task in self.unassigned() {
            *seen.entry(task.id).or_default() += 1;
        }

        for id in self.tasks.keys() {
            match seen.get(id).copied().unwrap_or(0) {
                1 => {}
                count => return Err(format!("task {id} appears in {count} buckets")),
            }
        }
        if seen.len() != self.tasks.len() {
            return Err(format!(
                "buckets hold {} tasks but the collection has {}",
                seen.len(),
                self.tasks.len()
            ));
        }
        Ok(())
    }
}

fn midpoint(low: i64, high: i64) -> i64 {
    let (low, high) = (i128::from(low), i128::from(high));
    let gap = high - low;
    let mid = if gap >= 2 { low + gap / 2 } else { high };
    i64::try_from(mid).unwrap_or(i64::MAX)
}
