//! Inline editing of a task title or a column name.

use uuid::Uuid;

use crate::error::ValidationError;

use super::Board;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EditTarget {
    TaskTitle(Uuid),
    StatusName(Uuid),
}

impl EditTarget {
    pub fn entity(self) -> Uuid {
        match self {
            EditTarget::TaskTitle(id) | EditTarget::StatusName(id) => id,
        }
    }

    fn current_value(self, board: &Board) -> Result<String, ValidationError> {
        match self {
            EditTarget::TaskTitle(id) => board
                .task(id)
                .map(|task| task.title.clone())
                .ok_or(ValidationError::UnknownTask(id)),
            EditTarget::StatusName(id) => board
                .status(id)
                .map(|status| status.name.clone())
                .ok_or(ValidationError::UnknownStatus(id)),
        }
    }

    fn write_value(self, board: &mut Board, value: String) -> bool {
        match self {
            EditTarget::TaskTitle(id) => board.set_task_title(id, value),
            EditTarget::StatusName(id) => board.set_status_name(id, value),
        }
    }

    fn empty_error(self) -> ValidationError {
        match self {
            EditTarget::TaskTitle(_) => ValidationError::EmptyTitle,
            EditTarget::StatusName(_) => ValidationError::EmptyStatusName,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EditDraft {
    pub target: EditTarget,
    pub draft: String,
    pub original: String,
    /// Latest value for the field received from another client while editing.
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub enum EditState {
    #[default]
    Viewing,
    Editing(EditDraft),
}

/// Value committed to the board; the caller issues the durable write.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EditCommit {
    pub target: EditTarget,
    pub value: String,
    pub previous: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CommitOutcome {
    /// Nothing changed; the editor closed without a write.
    Closed,
    Committed(EditCommit),
}

#[derive(Debug, Default)]
pub struct InlineEditor {
    state: EditState,
}

impl InlineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &EditState {
        &self.state
    }

    pub fn target(&self) -> Option<EditTarget> {
        match &self.state {
            EditState::Editing(draft) => Some(draft.target),
            EditState::Viewing => None,
        }
    }

    pub fn draft(&self) -> Option<&str> {
        match &self.state {
            EditState::Editing(draft) => Some(draft.draft.as_str()),
            EditState::Viewing => None,
        }
    }

    /// Opens the editor seeded with the field's current value. `dragging`
    /// is the task currently held by the drag controller, if any.
    pub fn begin(
        &mut self,
        board: &Board,
        target: EditTarget,
        dragging: Option<Uuid>,
    ) -> Result<(), ValidationError> {
        match self.target() {
            Some(current) if current == target => return Ok(()),
            Some(_) => return Err(ValidationError::EditInProgress),
            None => {}
        }
        if let EditTarget::TaskTitle(id) = target
            && dragging == Some(id)
        {
            return Err(ValidationError::TaskBusy(id));
        }

        let original = target.current_value(board)?;
        self.state = EditState::Editing(EditDraft {
            target,
            draft: original.clone(),
            original,
            remote: None,
        });
        Ok(())
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
        match &mut self.state {
            EditState::Editing(draft) => {
                draft.draft = text.into();
                true
            }
            EditState::Viewing => false,
        }
    }

    /// Validates and applies the draft. An empty draft is rejected and the
    /// editor stays open.
    pub fn commit(&mut self, board: &mut Board) -> Result<CommitOutcome, ValidationError> {
        let EditState::Editing(draft) = &self.state else {
            return Ok(CommitOutcome::Closed);
        };
        let target = draft.target;
        let value = draft.draft.trim().to_string();
        if value.is_empty() {
            return Err(target.empty_error());
        }

        let remote = draft.remote.clone();
        let previous = match target.current_value(board) {
            Ok(previous) => previous,
            Err(err) => {
                self.state = EditState::Viewing;
                return Err(err);
            }
        };
        self.state = EditState::Viewing;
        if value == previous {
            // Nothing to write; the held remote value becomes visible.
            if let Some(remote) = remote {
                target.write_value(board, remote);
            }
            return Ok(CommitOutcome::Closed);
        }

        target.write_value(board, value.clone());
        Ok(CommitOutcome::Committed(EditCommit {
            target,
            value,
            previous,
        }))
    }

    /// Discards the draft. A value received from another client while
    /// editing is adopted now.
    pub fn cancel(&mut self, board: &mut Board) -> bool {
        match std::mem::take(&mut self.state) {
            EditState::Editing(draft) => {
                if let Some(remote) = draft.remote {
                    draft.target.write_value(board, remote);
                }
                true
            }
            EditState::Viewing => false,
        }
    }

    /// Focus left the editor: an untouched draft cancels, anything else
    /// commits.
    pub fn blur(&mut self, board: &mut Board) -> Result<CommitOutcome, ValidationError> {
        let unchanged = match &self.state {
            EditState::Editing(draft) => draft.draft.trim() == draft.original.trim(),
            EditState::Viewing => return Ok(CommitOutcome::Closed),
        };
        if unchanged {
            self.cancel(board);
            return Ok(CommitOutcome::Closed);
        }
        self.commit(board)
    }

    /// Remembers the authoritative value of the field under edit.
    pub fn note_remote_value(&mut self, target: EditTarget, value: String) -> bool {
        match &mut self.state {
            EditState::Editing(draft) if draft.target == target => {
                draft.remote = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Closes the editor without a write if it is editing `entity`.
    pub fn invalidate(&mut self, entity: Uuid) -> bool {
        if self.target().map(EditTarget::entity) == Some(entity) {
            self.state = EditState::Viewing;
            return true;
        }
        false
    }
}
