//! Durable storage behind the board, plus the change feed that echoes every
//! successful write to all subscribers of the project.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::types::{ChangeEvent, NewProject, NewTask, Project, Status, Task, TaskPatch};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const DEFAULT_CHANGE_BUFFER: usize = 256;

#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn create_project(&self, project: NewProject) -> Result<Project>;

    /// Statuses of the project ordered by position.
    async fn list_statuses(&self, project_id: Uuid) -> Result<Vec<Status>>;

    /// Seeds the default columns. Callers only do this for a project with none.
    async fn create_default_statuses(&self, project_id: Uuid) -> Result<Vec<Status>>;

    async fn list_tasks(&self, project_id: Uuid) -> Result<Vec<Task>>;

    /// Creates a task at the end of its column.
    async fn create_task(&self, project_id: Uuid, task: NewTask) -> Result<Task>;

    async fn update_task(&self, task_id: Uuid, patch: TaskPatch) -> Result<Task>;

    async fn delete_task(&self, task_id: Uuid) -> Result<()>;

    async fn update_status_name(&self, status_id: Uuid, name: &str) -> Result<Status>;

    fn subscribe(&self, project_id: Uuid) -> Result<ChangeSubscription>;
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum FeedError {
    #[error("change feed fell behind and dropped {0} events")]
    Lagged(u64),

    #[error("change feed closed")]
    Closed,
}

/// Fan-out of change events shared by every subscriber of a store.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            trace!(kind, "no subscribers for change event");
        }
    }

    pub fn subscribe(&self, project_id: Uuid) -> ChangeSubscription {
        ChangeSubscription {
            project_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_BUFFER)
    }
}

/// Receives change events for one project. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeSubscription {
    project_id: Uuid,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.project_id() == self.project_id => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(FeedError::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }

    /// Next already-delivered event, if any, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.project_id() == self.project_id => return Ok(Some(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(FeedError::Lagged(skipped));
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}
