//! One open project: the board plus the interactions, writes and change
//! feed that keep it current.
//!
//! Every handler takes `&mut self` and runs to completion, so gestures,
//! write completions and remote events never interleave. Durable writes run
//! on spawned tasks and report back through an unbounded channel.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::board::Board;
use crate::board::drag::{DragController, DragState, DropOutcome, DropTarget};
use crate::board::edit::{CommitOutcome, EditCommit, EditState, EditTarget, InlineEditor};
use crate::board::pending::{PendingKey, PendingWrites, Settled, Snapshot, WriteToken};
use crate::board::reconcile::{Reconciled, reconcile};
use crate::error::{BoardError, Notice, ValidationError, WriteOperation};
use crate::settings::Settings;
use crate::store::{BoardStore, ChangeSubscription, FeedError};
use crate::types::{ChangeEvent, NewTask, Task, TaskPatch};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SessionOptions {
    pub notice_capacity: usize,
    pub notice_ttl: Duration,
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            notice_capacity: settings.notice_capacity,
            notice_ttl: settings.notification_display_duration(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Debug)]
struct WriteCompletion {
    token: WriteToken,
    operation: WriteOperation,
    entity: Uuid,
    result: Result<(), String>,
}

/// What one step of the event loop did.
#[derive(Debug)]
pub enum Handled {
    Remote(Reconciled),
    Completion {
        settled: Settled,
        failure: Option<BoardError>,
    },
    FeedError(FeedError),
}

pub struct ProjectSession {
    project_id: Uuid,
    store: Arc<dyn BoardStore>,
    board: Board,
    drag: DragController,
    editor: InlineEditor,
    pending: PendingWrites,
    subscription: Option<ChangeSubscription>,
    completion_tx: mpsc::UnboundedSender<WriteCompletion>,
    completion_rx: mpsc::UnboundedReceiver<WriteCompletion>,
    outstanding: usize,
    notices: VecDeque<Notice>,
    options: SessionOptions,
}

impl ProjectSession {
    /// Subscribes first, then loads, so nothing written in between is missed.
    /// A project without columns gets the default set.
    pub async fn open(
        store: Arc<dyn BoardStore>,
        project_id: Uuid,
        options: SessionOptions,
    ) -> Result<Self> {
        let subscription = store
            .subscribe(project_id)
            .with_context(|| format!("failed to subscribe to project {project_id}"))?;

        let mut statuses = store
            .list_statuses(project_id)
            .await
            .context("failed to load statuses")?;
        if statuses.is_empty() {
            statuses = store
                .create_default_statuses(project_id)
                .await
                .context("failed to seed default statuses")?;
        }
        let tasks = store
            .list_tasks(project_id)
            .await
            .context("failed to load tasks")?;

        info!(
            %project_id,
            statuses = statuses.len(),
            tasks = tasks.len(),
            "project session opened"
        );

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Ok(Self {
            project_id,
            store,
            board: Board::from_snapshot(project_id, statuses, tasks),
            drag: DragController::new(),
            editor: InlineEditor::new(),
            pending: PendingWrites::new(),
            subscription: Some(subscription),
            completion_tx,
            completion_rx,
            outstanding: 0,
            notices: VecDeque::new(),
            options,
        })
    }

    /// Ends the subscription. Writes still in flight finish on their own.
    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        info!(
            project_id = %self.project_id,
            outstanding = self.outstanding,
            "project session closed"
        );
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn drag_state(&self) -> &DragState {
        self.drag.state()
    }

    pub fn edit_state(&self) -> &EditState {
        self.editor.state()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn outstanding_writes(&self) -> usize {
        self.outstanding
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    // Drag and drop

    pub fn pick_up(&mut self, task_id: Uuid) -> Result<(), ValidationError> {
        if self.editor.target() == Some(EditTarget::TaskTitle(task_id)) {
            return Err(ValidationError::TaskBusy(task_id));
        }
        self.drag.pick_up(&self.board, task_id)
    }

    pub fn hover(&mut self, target: Option<DropTarget>) {
        self.drag.hover(target);
    }

    pub fn cancel_drag(&mut self) -> bool {
        self.drag.cancel()
    }

    /// Drops the dragged task. A cross-column move shows up on the board
    /// immediately and its write is issued in the background.
    pub fn drop_task(&mut self) -> DropOutcome {
        let outcome = self.drag.drop(&mut self.board);
        if let DropOutcome::Moved(intent) = &outcome {
            let token = self.pending.begin(
                PendingKey::TaskPlacement(intent.task_id),
                WriteOperation::MoveTask,
                Snapshot::Placement {
                    status_id: intent.from_status,
                    position: intent.from_position,
                },
            );
            let store = Arc::clone(&self.store);
            let (task_id, patch) = (intent.task_id, intent.patch());
            self.spawn_write(token, WriteOperation::MoveTask, task_id, async move {
                store.update_task(task_id, patch).await.map(|_| ())
            });
        }
        outcome
    }

    /// Pick up, hover and drop in one call.
    pub fn move_task(
        &mut self,
        task_id: Uuid,
        target: DropTarget,
    ) -> Result<DropOutcome, ValidationError> {
        self.pick_up(task_id)?;
        self.hover(Some(target));
        Ok(self.drop_task())
    }

    // Inline editing

    pub fn begin_edit(&mut self, target: EditTarget) -> Result<(), ValidationError> {
        self.editor
            .begin(&self.board, target, self.drag.dragging())
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
        self.editor.set_draft(text)
    }

    pub fn commit_edit(&mut self) -> Result<CommitOutcome, ValidationError> {
        let outcome = self.editor.commit(&mut self.board)?;
        if let CommitOutcome::Committed(commit) = &outcome {
            self.issue_edit(commit.clone());
        }
        Ok(outcome)
    }

    pub fn cancel_edit(&mut self) -> bool {
        self.editor.cancel(&mut self.board)
    }

    pub fn blur_edit(&mut self) -> Result<CommitOutcome, ValidationError> {
        let outcome = self.editor.blur(&mut self.board)?;
        if let CommitOutcome::Committed(commit) = &outcome {
            self.issue_edit(commit.clone());
        }
        Ok(outcome)
    }

    /// Begin, replace the draft and commit. A rejected value closes the
    /// editor again.
    pub fn rename(
        &mut self,
        target: EditTarget,
        text: impl Into<String>,
    ) -> Result<CommitOutcome, ValidationError> {
        self.begin_edit(target)?;
        self.set_draft(text);
        let outcome = self.commit_edit();
        if outcome.is_err() {
            self.cancel_edit();
        }
        outcome
    }

    fn issue_edit(&mut self, commit: EditCommit) {
        let store = Arc::clone(&self.store);
        match commit.target {
            EditTarget::TaskTitle(task_id) => {
                let token = self.pending.begin(
                    PendingKey::TaskTitle(task_id),
                    WriteOperation::RenameTask,
                    Snapshot::Title(commit.previous),
                );
                let patch = TaskPatch {
                    title: Some(commit.value),
                    ..TaskPatch::default()
                };
                self.spawn_write(token, WriteOperation::RenameTask, task_id, async move {
                    store.update_task(task_id, patch).await.map(|_| ())
                });
            }
            EditTarget::StatusName(status_id) => {
                let token = self.pending.begin(
                    PendingKey::StatusName(status_id),
                    WriteOperation::RenameStatus,
                    Snapshot::StatusName(commit.previous),
                );
                let name = commit.value;
                self.spawn_write(token, WriteOperation::RenameStatus, status_id, async move {
                    store.update_status_name(status_id, &name).await.map(|_| ())
                });
            }
        }
    }

    // Task details

    /// Applies several task fields at once and writes them in one update.
    /// Returns the task as now shown, or `None` when the patch changes
    /// nothing. A failed write restores the whole task.
    pub fn update_task(
        &mut self,
        task_id: Uuid,
        mut patch: TaskPatch,
    ) -> Result<Option<Task>, ValidationError> {
        let current = self
            .board
            .task(task_id)
            .cloned()
            .ok_or(ValidationError::UnknownTask(task_id))?;
        if self.drag.dragging() == Some(task_id) {
            return Err(ValidationError::TaskBusy(task_id));
        }
        if let Some(title) = patch.title.take() {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(ValidationError::EmptyTitle);
            }
            if self.editor.target() == Some(EditTarget::TaskTitle(task_id)) {
                return Err(ValidationError::EditInProgress);
            }
            patch.title = Some(title);
        }
        if let Some(Some(status_id)) = patch.status_id
            && self.board.status(status_id).is_none()
        {
            return Err(ValidationError::UnknownStatus(status_id));
        }
        if let Some(Some(status_id)) = patch.status_id
            && patch.position.is_none()
            && current.status_id != Some(status_id)
        {
            patch.position = Some(self.board.position_for_drop(status_id, None, task_id));
        }

        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        if updated == current {
            return Ok(None);
        }

        self.board.upsert_task(updated.clone());
        let token = self.pending.begin(
            PendingKey::TaskFields(task_id),
            WriteOperation::UpdateTask,
            Snapshot::Task(Box::new(current)),
        );
        let store = Arc::clone(&self.store);
        self.spawn_write(token, WriteOperation::UpdateTask, task_id, async move {
            store.update_task(task_id, patch).await.map(|_| ())
        });
        Ok(Some(updated))
    }

    // Create and delete

    /// Creates a task and waits for the store. Nothing is shown until the
    /// store has assigned an id and a position.
    pub async fn create_task(&mut self, mut task: NewTask) -> Result<Task, BoardError> {
        task.title = task.title.trim().to_string();
        if task.title.is_empty() {
            return Err(ValidationError::EmptyTitle.into());
        }
        if let Some(status_id) = task.status_id
            && self.board.status(status_id).is_none()
        {
            return Err(ValidationError::UnknownStatus(status_id).into());
        }

        match self.store.create_task(self.project_id, task).await {
            Ok(created) => {
                self.board.upsert_task(created.clone());
                Ok(created)
            }
            Err(err) => {
                let failure = BoardError::WriteFailure {
                    operation: WriteOperation::CreateTask,
                    entity: self.project_id,
                    message: format!("{err:#}"),
                };
                warn!(project_id = %self.project_id, error = %failure, "task creation failed");
                self.push_notice(Notice::from_error(&failure));
                Err(failure)
            }
        }
    }

    /// Removes the task at once; a failed delete puts it back.
    pub fn delete_task(&mut self, task_id: Uuid) -> Result<(), ValidationError> {
        let removed = self
            .board
            .remove_task(task_id)
            .ok_or(ValidationError::UnknownTask(task_id))?;
        self.drag.invalidate(task_id);
        self.editor.invalidate(task_id);
        self.pending.forget_entity(task_id);

        let token = self.pending.begin(
            PendingKey::TaskRemoval(task_id),
            WriteOperation::DeleteTask,
            Snapshot::Removed(Box::new(removed)),
        );
        let store = Arc::clone(&self.store);
        self.spawn_write(token, WriteOperation::DeleteTask, task_id, async move {
            store.delete_task(task_id).await
        });
        Ok(())
    }

    fn spawn_write<F>(&mut self, token: WriteToken, operation: WriteOperation, entity: Uuid, write: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.outstanding += 1;
        debug!(%token, %operation, %entity, "write issued");
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = write.await.map_err(|err| format!("{err:#}"));
            let completion = WriteCompletion {
                token,
                operation,
                entity,
                result,
            };
            if tx.send(completion).is_err() {
                debug!(%token, "session gone before write completed");
            }
        });
    }

    // Event loop

    /// Applies one change-feed event, as if it had just been received.
    pub fn apply_remote(&mut self, event: ChangeEvent) -> Reconciled {
        let kind = event.kind();
        let entity = event.entity_id();
        let reconciled = reconcile(
            &mut self.board,
            &mut self.pending,
            &mut self.editor,
            &mut self.drag,
            event,
        );
        debug!(
            kind,
            %entity,
            outcome = ?reconciled.outcome,
            pending_cleared = reconciled.pending_cleared,
            shielded = reconciled.shielded,
            interrupted = reconciled.interrupted,
            "remote change reconciled"
        );
        reconciled
    }

    fn apply_completion(&mut self, completion: WriteCompletion) -> Handled {
        self.outstanding = self.outstanding.saturating_sub(1);
        let settled = self
            .pending
            .settle(completion.token, completion.result.is_ok());

        let failure = match completion.result {
            Ok(()) => {
                debug!(token = %completion.token, ?settled, "write confirmed");
                None
            }
            Err(message) => {
                if let Settled::RollBack { key, previous } = &settled {
                    self.restore(*key, previous.clone());
                }
                let failure = BoardError::WriteFailure {
                    operation: completion.operation,
                    entity: completion.entity,
                    message,
                };
                warn!(
                    token = %completion.token,
                    ?settled,
                    error = %failure,
                    "write failed"
                );
                self.push_notice(Notice::from_error(&failure));
                Some(failure)
            }
        };
        Handled::Completion { settled, failure }
    }

    fn restore(&mut self, key: PendingKey, previous: Snapshot) {
        let restored = match (key, previous) {
            (PendingKey::TaskPlacement(id), Snapshot::Placement { status_id, position }) => {
                self.board.set_task_placement(id, status_id, position)
            }
            (PendingKey::TaskTitle(id), Snapshot::Title(title)) => {
                self.board.set_task_title(id, title)
            }
            (PendingKey::StatusName(id), Snapshot::StatusName(name)) => {
                self.board.set_status_name(id, name)
            }
            (PendingKey::TaskFields(id), Snapshot::Task(task)) => {
                self.board.contains_task(id) && !self.board.upsert_task(*task)
            }
            (PendingKey::TaskRemoval(_), Snapshot::Removed(task)) => {
                self.board.upsert_task(*task);
                true
            }
            (key, previous) => {
                warn!(?key, ?previous, "snapshot does not match pending key");
                false
            }
        };
        if !restored {
            debug!(?key, "nothing to roll back");
        }
    }

    fn handle_feed_error(&mut self, err: FeedError) -> Handled {
        if err == FeedError::Closed {
            self.subscription = None;
        }
        warn!(project_id = %self.project_id, error = %err, "change feed trouble");
        let failure = BoardError::SubscriptionFailure(err.to_string());
        self.push_notice(Notice::from_error(&failure));
        Handled::FeedError(err)
    }

    /// Waits for the next write completion or remote event and applies it.
    /// Returns `None` when there is nothing left that could arrive.
    pub async fn process_next(&mut self) -> Option<Handled> {
        if self.outstanding == 0 && self.subscription.is_none() {
            return None;
        }

        enum Next {
            Completion(WriteCompletion),
            Remote(Result<ChangeEvent, FeedError>),
        }

        let next = {
            let subscription = self.subscription.as_mut();
            tokio::select! {
                Some(completion) = self.completion_rx.recv() => Next::Completion(completion),
                received = next_change(subscription) => Next::Remote(received),
            }
        };

        Some(match next {
            Next::Completion(completion) => self.apply_completion(completion),
            Next::Remote(Ok(event)) => Handled::Remote(self.apply_remote(event)),
            Next::Remote(Err(err)) => self.handle_feed_error(err),
        })
    }

    /// Applies everything already delivered without waiting.
    pub fn drain_ready(&mut self) -> Vec<Handled> {
        let mut handled = Vec::new();
        loop {
            let before = handled.len();
            while let Ok(completion) = self.completion_rx.try_recv() {
                handled.push(self.apply_completion(completion));
            }

            let received = match self.subscription.as_mut() {
                Some(subscription) => subscription.try_recv(),
                None => Ok(None),
            };
            match received {
                Ok(Some(event)) => handled.push(Handled::Remote(self.apply_remote(event))),
                Ok(None) => {}
                Err(err) => handled.push(self.handle_feed_error(err)),
            }

            if handled.len() == before {
                return handled;
            }
        }
    }

    /// Waits until every issued write has completed, then applies whatever
    /// else is ready. Returns the write failures seen on the way.
    pub async fn settle(&mut self) -> Vec<BoardError> {
        let mut handled = Vec::new();
        while self.outstanding > 0 {
            match self.process_next().await {
                Some(step) => handled.push(step),
                None => break,
            }
        }
        handled.extend(self.drain_ready());

        handled
            .into_iter()
            .filter_map(|step| match step {
                Handled::Completion { failure, .. } => failure,
                _ => None,
            })
            .collect()
    }

    /// Reloads statuses and tasks. Outstanding writes can no longer roll
    /// anything back.
    pub async fn refresh(&mut self) -> Result<()> {
        let statuses = self
            .store
            .list_statuses(self.project_id)
            .await
            .context("failed to reload statuses")?;
        let tasks = self
            .store
            .list_tasks(self.project_id)
            .await
            .context("failed to reload tasks")?;

        self.pending.supersede_all();
        self.board.replace_all(statuses, tasks);

        if let Some(task_id) = self.drag.dragging()
            && !self.board.contains_task(task_id)
        {
            self.drag.invalidate(task_id);
        }
        let stale_edit = match self.editor.target() {
            Some(EditTarget::TaskTitle(id)) => !self.board.contains_task(id),
            Some(EditTarget::StatusName(id)) => self.board.status(id).is_none(),
            None => false,
        };
        if let (true, Some(target)) = (stale_edit, self.editor.target()) {
            self.editor.invalidate(target.entity());
        }

        info!(
            project_id = %self.project_id,
            tasks = self.board.task_count(),
            "board refreshed"
        );
        Ok(())
    }

    // Notices

    fn push_notice(&mut self, notice: Notice) {
        self.prune_notices(Instant::now());
        self.notices.push_back(notice);
        while self.notices.len() > self.options.notice_capacity.max(1) {
            self.notices.pop_front();
        }
    }

    /// Drops notices older than the display duration.
    pub fn prune_notices(&mut self, now: Instant) -> usize {
        let before = self.notices.len();
        let ttl = self.options.notice_ttl;
        self.notices.retain(|notice| !notice.is_expired(now, ttl));
        before - self.notices.len()
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }
}

async fn next_change(
    subscription: Option<&mut ChangeSubscription>,
) -> Result<ChangeEvent, FeedError> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
