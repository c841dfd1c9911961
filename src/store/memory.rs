use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BoardStore, ChangeFeed, ChangeSubscription};
use crate::board::POSITION_STEP;
use crate::types::{
    ChangeEvent, DEFAULT_STATUSES, NewProject, NewTask, Project, Status, Task, TaskPatch,
};

#[derive(Debug, Default)]
struct Inner {
    projects: Vec<Project>,
    statuses: Vec<Status>,
    tasks: Vec<Task>,
}

impl Inner {
    fn task_mut(&mut self, id: Uuid) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == id)
            .with_context(|| format!("task {id} not found"))
    }

    fn next_position(&self, project_id: Uuid, status_id: Option<Uuid>) -> i64 {
        self.tasks
            .iter()
            .filter(|task| task.project_id == project_id && task.status_id == status_id)
            .map(|task| task.position)
            .max()
            .map(|last| last.saturating_add(POSITION_STEP))
            .unwrap_or(0)
    }
}

/// In-process store. Clones share the same data and change feed, so two
/// clones behave like two clients of one backend.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    feed: ChangeFeed,
    failures: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::default())
    }

    pub fn with_feed(feed: ChangeFeed) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            feed,
            failures: Arc::new(AtomicUsize::new(0)),
            offline: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the next `count` write calls fail.
    pub fn fail_writes(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// While offline every write fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of write calls received, failed ones included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Broadcasts an event as if another client had written it. The stored
    /// data is not touched.
    pub fn publish(&self, event: ChangeEvent) {
        self.feed.publish(event);
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn gate_write(&self, operation: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            bail!("{operation}: store is offline");
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            bail!("{operation}: injected write failure");
        }
        Ok(())
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let inner = self.inner.lock().await;
        Ok(inner.projects.clone())
    }

    async fn create_project(&self, project: NewProject) -> Result<Project> {
        self.gate_write("create project")?;
        let name = project.name.trim();
        if name.is_empty() {
            bail!("project name cannot be empty");
        }
        let created = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color: project.color,
            description: project.description,
        };
        self.inner.lock().await.projects.push(created.clone());
        Ok(created)
    }

    async fn list_statuses(&self, project_id: Uuid) -> Result<Vec<Status>> {
        let inner = self.inner.lock().await;
        let mut statuses = inner
            .statuses
            .iter()
            .filter(|status| status.project_id == project_id)
            .cloned()
            .collect::<Vec<_>>();
        statuses.sort_by_key(|status| status.position);
        Ok(statuses)
    }

    async fn create_default_statuses(&self, project_id: Uuid) -> Result<Vec<Status>> {
        self.gate_write("create default statuses")?;
        let created = DEFAULT_STATUSES
            .iter()
            .map(|(name, color, position)| Status {
                id: Uuid::new_v4(),
                project_id,
                name: name.to_string(),
                color: color.to_string(),
                position: *position,
            })
            .collect::<Vec<_>>();

        self.inner
            .lock()
            .await
            .statuses
            .extend(created.iter().cloned());
        for status in &created {
            self.feed.publish(ChangeEvent::StatusCreated(status.clone()));
        }
        Ok(created)
    }

    async fn list_tasks(&self, project_id: Uuid) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks = inner
            .tasks
            .iter()
            .filter(|task| task.project_id == project_id)
            .cloned()
            .collect::<Vec<_>>();
        tasks.sort_by_key(|task| task.position);
        Ok(tasks)
    }

    async fn create_task(&self, project_id: Uuid, task: NewTask) -> Result<Task> {
        self.gate_write("create task")?;
        let mut inner = self.inner.lock().await;
        if let Some(status_id) = task.status_id
            && !inner
                .statuses
                .iter()
                .any(|status| status.id == status_id && status.project_id == project_id)
        {
            bail!("status {status_id} not found in project {project_id}");
        }

        let created = Task {
            id: Uuid::new_v4(),
            project_id,
            title: task.title,
            description: task.description,
            priority: task.priority,
            due_date: task.due_date,
            status_id: task.status_id,
            assignee: None,
            position: inner.next_position(project_id, task.status_id),
        };
        inner.tasks.push(created.clone());
        drop(inner);

        self.feed.publish(ChangeEvent::TaskCreated(created.clone()));
        Ok(created)
    }

    async fn update_task(&self, task_id: Uuid, patch: TaskPatch) -> Result<Task> {
        self.gate_write("update task")?;
        let updated = {
            let mut inner = self.inner.lock().await;
            let task = inner.task_mut(task_id)?;
            patch.apply_to(task);
            task.clone()
        };
        self.feed.publish(ChangeEvent::TaskUpdated(updated.clone()));
        Ok(updated)
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        self.gate_write("delete task")?;
        let removed = {
            let mut inner = self.inner.lock().await;
            let index = inner
                .tasks
                .iter()
                .position(|task| task.id == task_id)
                .with_context(|| format!("task {task_id} not found"))?;
            inner.tasks.remove(index)
        };
        self.feed.publish(ChangeEvent::TaskDeleted {
            id: removed.id,
            project_id: removed.project_id,
        });
        Ok(())
    }

    async fn update_status_name(&self, status_id: Uuid, name: &str) -> Result<Status> {
        self.gate_write("rename status")?;
        let name = name.trim();
        if name.is_empty() {
            bail!("status name cannot be empty");
        }
        let updated = {
            let mut inner = self.inner.lock().await;
            let status = inner
                .statuses
                .iter_mut()
                .find(|status| status.id == status_id)
                .with_context(|| format!("status {status_id} not found"))?;
            status.name = name.to_string();
            status.clone()
        };
        self.feed.publish(ChangeEvent::StatusUpdated(updated.clone()));
        Ok(updated)
    }

    fn subscribe(&self, project_id: Uuid) -> Result<ChangeSubscription> {
        Ok(self.feed.subscribe(project_id))
    }
}
