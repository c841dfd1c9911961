//! Drag-and-drop state machine: pick up, hover, drop.

use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::TaskPatch;

use super::{Board, Placement};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DropTarget {
    /// Append to the end of this column.
    Column(Uuid),
    /// Land next to this task, in whatever column it sits.
    Task { task_id: Uuid, placement: Placement },
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        task_id: Uuid,
        origin_status: Option<Uuid>,
        hover: Option<DropTarget>,
    },
}

/// A resolved move, already applied to the board.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MoveIntent {
    pub task_id: Uuid,
    pub from_status: Option<Uuid>,
    pub from_position: i64,
    pub to_status: Uuid,
    pub to_position: i64,
}

impl MoveIntent {
    pub fn patch(&self) -> TaskPatch {
        TaskPatch {
            status_id: Some(Some(self.to_status)),
            position: Some(self.to_position),
            ..TaskPatch::default()
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DropOutcome {
    /// No valid target, or the task vanished mid-drag.
    Cancelled,
    /// Dropped onto the column it already sits in.
    Unchanged,
    Moved(MoveIntent),
}

#[derive(Debug, Default)]
pub struct DragController {
    state: DragState,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn dragging(&self) -> Option<Uuid> {
        match self.state {
            DragState::Dragging { task_id, .. } => Some(task_id),
            DragState::Idle => None,
        }
    }

    pub fn pick_up(&mut self, board: &Board, task_id: Uuid) -> Result<(), ValidationError> {
        let task = board
            .task(task_id)
            .ok_or(ValidationError::UnknownTask(task_id))?;
        self.state = DragState::Dragging {
            task_id,
            origin_status: task.status_id,
            hover: None,
        };
        Ok(())
    }

    pub fn hover(&mut self, target: Option<DropTarget>) {
        if let DragState::Dragging { hover, .. } = &mut self.state {
            *hover = target;
        }
    }

    pub fn cancel(&mut self) -> bool {
        let was_dragging = self.dragging().is_some();
        self.state = DragState::Idle;
        was_dragging
    }

    /// Silently ends a drag of `task_id`, e.g. after a remote delete.
    pub fn invalidate(&mut self, task_id: Uuid) -> bool {
        if self.dragging() == Some(task_id) {
            self.state = DragState::Idle;
            return true;
        }
        false
    }

    /// Ends the drag. A cross-column drop is applied to the board before
    /// returning; the caller owns issuing the durable write.
    pub fn drop(&mut self, board: &mut Board) -> DropOutcome {
        let DragState::Dragging { task_id, hover, .. } = std::mem::take(&mut self.state) else {
            return DropOutcome::Cancelled;
        };
        let Some(task) = board.task(task_id) else {
            return DropOutcome::Cancelled;
        };
        let Some((to_status, anchor)) = hover.and_then(|target| resolve_target(board, target))
        else {
            return DropOutcome::Cancelled;
        };

        if task.status_id == Some(to_status) {
            return DropOutcome::Unchanged;
        }

        let from_status = task.status_id;
        let from_position = task.position;
        let to_position = board.position_for_drop(to_status, anchor, task_id);
        board.set_task_placement(task_id, Some(to_status), to_position);

        DropOutcome::Moved(MoveIntent {
            task_id,
            from_status,
            from_position,
            to_status,
            to_position,
        })
    }
}

fn resolve_target(board: &Board, target: DropTarget) -> Option<(Uuid, Option<(Uuid, Placement)>)> {
    match target {
        DropTarget::Column(status_id) => board.status(status_id).map(|status| (status.id, None)),
        DropTarget::Task { task_id, placement } => {
            let over = board.task(task_id)?;
            let status_id = over.status_id.filter(|id| board.status(*id).is_some())?;
            Some((status_id, Some((task_id, placement))))
        }
    }
}
