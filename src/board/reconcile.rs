//! Applies change-feed events to the local board.
//!
//! The last event observed for an entity wins. Local interactions are only
//! consulted to keep a draft under edit intact and to end drags or edits of
//! tasks that no longer exist.

use crate::types::{ChangeEvent, Status, Task};

use super::Board;
use super::drag::DragController;
use super::edit::{EditTarget, InlineEditor};
use super::pending::PendingWrites;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReconcileOutcome {
    Inserted,
    Replaced,
    Removed,
    /// Another project's event, or a delete of something never seen.
    Ignored,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Reconciled {
    pub outcome: ReconcileOutcome,
    /// Pending writes the event superseded or forgot.
    pub pending_cleared: usize,
    /// The field under edit kept its local value.
    pub shielded: bool,
    /// A drag or inline edit was cancelled because its task is gone.
    pub interrupted: bool,
}

impl Reconciled {
    fn ignored() -> Self {
        Self {
            outcome: ReconcileOutcome::Ignored,
            pending_cleared: 0,
            shielded: false,
            interrupted: false,
        }
    }
}

pub fn reconcile(
    board: &mut Board,
    pending: &mut PendingWrites,
    editor: &mut InlineEditor,
    drag: &mut DragController,
    event: ChangeEvent,
) -> Reconciled {
    if event.project_id() != board.project_id() {
        return Reconciled::ignored();
    }

    match event {
        ChangeEvent::TaskCreated(task) | ChangeEvent::TaskUpdated(task) => {
            apply_task(board, pending, editor, task)
        }
        ChangeEvent::StatusCreated(status) | ChangeEvent::StatusUpdated(status) => {
            apply_status(board, pending, editor, status)
        }
        ChangeEvent::TaskDeleted { id, .. } => {
            let pending_cleared = pending.forget_entity(id);
            let dropped_drag = drag.invalidate(id);
            let dropped_edit = editor.invalidate(id);
            let outcome = match board.remove_task(id) {
                Some(_) => ReconcileOutcome::Removed,
                None => ReconcileOutcome::Ignored,
            };
            Reconciled {
                outcome,
                pending_cleared,
                shielded: false,
                interrupted: dropped_drag || dropped_edit,
            }
        }
    }
}

fn apply_task(
    board: &mut Board,
    pending: &mut PendingWrites,
    editor: &mut InlineEditor,
    mut task: Task,
) -> Reconciled {
    let pending_cleared = pending.supersede_entity(task.id);
    let target = EditTarget::TaskTitle(task.id);
    let local_title = board.task(task.id).map(|current| current.title.clone());

    let mut shielded = false;
    if editor.target() == Some(target)
        && let Some(local_title) = local_title
    {
        let incoming = std::mem::replace(&mut task.title, local_title);
        editor.note_remote_value(target, incoming);
        shielded = true;
    }

    let outcome = if board.upsert_task(task) {
        ReconcileOutcome::Inserted
    } else {
        ReconcileOutcome::Replaced
    };
    Reconciled {
        outcome,
        pending_cleared,
        shielded,
        interrupted: false,
    }
}

fn apply_status(
    board: &mut Board,
    pending: &mut PendingWrites,
    editor: &mut InlineEditor,
    mut status: Status,
) -> Reconciled {
    let pending_cleared = pending.supersede_entity(status.id);
    let target = EditTarget::StatusName(status.id);
    let local_name = board.status(status.id).map(|current| current.name.clone());

    let mut shielded = false;
    if editor.target() == Some(target)
        && let Some(local_name) = local_name
    {
        let incoming = std::mem::replace(&mut status.name, local_name);
        editor.note_remote_value(target, incoming);
        shielded = true;
    }

    let outcome = if board.upsert_status(status) {
        ReconcileOutcome::Inserted
    } else {
        ReconcileOutcome::Replaced
    };
    Reconciled {
        outcome,
        pending_cleared,
        shielded,
        interrupted: false,
    }
}
