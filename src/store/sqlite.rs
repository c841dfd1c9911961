use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use super::{BoardStore, ChangeFeed, ChangeSubscription};
use crate::board::POSITION_STEP;
use crate::types::{
    Assignee, ChangeEvent, DEFAULT_STATUSES, NewProject, NewTask, Project, Priority, Status,
    Task, TaskPatch,
};

const TASK_COLUMNS: &str = "id, project_id, title, description, priority, due_date, status_id, \
     assignee_email, assignee_name, position";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_feed(path, ChangeFeed::default()).await
    }

    pub async fn open_with_feed(path: impl AsRef<Path>, feed: ChangeFeed) -> Result<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create parent directories for {}",
                    path_ref.display()
                )
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path_ref)
            .create_if_missing(true)
            .foreign_keys(true);
        Self::connect(options, feed)
            .await
            .with_context(|| format!("failed to open sqlite db at {}", path_ref.display()))
    }

    /// Private database that lives as long as the store.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory sqlite url")?
            .foreign_keys(true);
        Self::connect(options, ChangeFeed::default()).await
    }

    async fn connect(options: SqliteConnectOptions, feed: ChangeFeed) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite")?;

        let store = Self { pool, feed };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn run_migrations(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS statuses (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                position INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                due_date TEXT,
                status_id TEXT REFERENCES statuses(id) ON DELETE SET NULL,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id, status_id, position)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("failed to run sqlite migrations")?;
        }

        self.add_column_if_missing("tasks", "assignee_email TEXT")
            .await?;
        self.add_column_if_missing("tasks", "assignee_name TEXT")
            .await?;
        Ok(())
    }

    async fn add_column_if_missing(&self, table: &str, column: &str) -> Result<()> {
        let statement = format!("ALTER TABLE {table} ADD COLUMN {column}");
        match sqlx::query(&statement).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_column_err(&err) => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to migrate {table}.{column}")),
        }
    }

    async fn get_task(&self, tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> Result<Task> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .context("failed to load task")?
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        map_task_row(&row)
    }
}

#[async_trait]
impl BoardStore for SqliteStore {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, name, color, description FROM projects ORDER BY created_at ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load projects")?;
        rows.iter().map(map_project_row).collect()
    }

    async fn create_project(&self, project: NewProject) -> Result<Project> {
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
        sqlx::query(
            "INSERT INTO projects (id, name, color, description, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(created.id.to_string())
        .bind(&created.name)
        .bind(&created.color)
        .bind(&created.description)
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .context("failed to insert project")?;
        Ok(created)
    }

    async fn list_statuses(&self, project_id: Uuid) -> Result<Vec<Status>> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, color, position FROM statuses \
             WHERE project_id = ? ORDER BY position ASC, id ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to load statuses")?;
        rows.iter().map(map_status_row).collect()
    }

    async fn create_default_statuses(&self, project_id: Uuid) -> Result<Vec<Status>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        let mut created = Vec::with_capacity(DEFAULT_STATUSES.len());
        for (name, color, position) in DEFAULT_STATUSES {
            let status = Status {
                id: Uuid::new_v4(),
                project_id,
                name: name.to_string(),
                color: color.to_string(),
                position,
            };
            sqlx::query(
                "INSERT INTO statuses (id, project_id, name, color, position) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(status.id.to_string())
            .bind(project_id.to_string())
            .bind(&status.name)
            .bind(&status.color)
            .bind(status.position)
            .execute(&mut *tx)
            .await
            .context("failed to insert status")?;
            created.push(status);
        }
        tx.commit().await.context("failed to seed default statuses")?;

        for status in &created {
            self.feed.publish(ChangeEvent::StatusCreated(status.clone()));
        }
        Ok(created)
    }

    async fn list_tasks(&self, project_id: Uuid) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ? \
             ORDER BY position ASC, created_at ASC"
        ))
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to load tasks")?;
        rows.iter().map(map_task_row).collect()
    }

    async fn create_task(&self, project_id: Uuid, task: NewTask) -> Result<Task> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        let status_id = task.status_id.map(|id| id.to_string());

        if let Some(status) = &status_id {
            let known: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM statuses WHERE id = ? AND project_id = ?",
            )
            .bind(status)
            .bind(project_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context("failed to look up status")?;
            if known == 0 {
                bail!("status {status} not found in project {project_id}");
            }
        }

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + ?, 0) FROM tasks WHERE project_id = ? AND status_id IS ?",
        )
        .bind(POSITION_STEP)
        .bind(project_id.to_string())
        .bind(&status_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to compute task position")?;

        let id = Uuid::new_v4();
        let now = now_iso();
        sqlx::query(
            "INSERT INTO tasks (
                id, project_id, title, description, priority, due_date, status_id,
                position, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(project_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.due_date.map(format_date))
        .bind(&status_id)
        .bind(position)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .context("failed to insert task")?;

        let created = self.get_task(&mut tx, id).await?;
        tx.commit().await.context("failed to commit task")?;

        self.feed.publish(ChangeEvent::TaskCreated(created.clone()));
        Ok(created)
    }

    async fn update_task(&self, task_id: Uuid, patch: TaskPatch) -> Result<Task> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        let mut task = self.get_task(&mut tx, task_id).await?;
        patch.apply_to(&mut task);

        sqlx::query(
            "UPDATE tasks
             SET title = ?, description = ?, priority = ?, due_date = ?, status_id = ?,
                 position = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.due_date.map(format_date))
        .bind(task.status_id.map(|id| id.to_string()))
        .bind(task.position)
        .bind(now_iso())
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await
        .context("failed to update task")?;
        tx.commit().await.context("failed to commit task update")?;

        self.feed.publish(ChangeEvent::TaskUpdated(task.clone()));
        Ok(task)
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        let project_id: Option<String> =
            sqlx::query_scalar("DELETE FROM tasks WHERE id = ? RETURNING project_id")
                .bind(task_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .context("failed to delete task")?;
        let Some(project_id) = project_id else {
            bail!("task {task_id} not found");
        };

        self.feed.publish(ChangeEvent::TaskDeleted {
            id: task_id,
            project_id: parse_uuid(&project_id, "project_id")?,
        });
        Ok(())
    }

    async fn update_status_name(&self, status_id: Uuid, name: &str) -> Result<Status> {
        let name = name.trim();
        if name.is_empty() {
            bail!("status name cannot be empty");
        }
        let row = sqlx::query(
            "UPDATE statuses SET name = ? WHERE id = ? \
             RETURNING id, project_id, name, color, position",
        )
        .bind(name)
        .bind(status_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to rename status")?
        .ok_or_else(|| anyhow!("status {status_id} not found"))?;
        let status = map_status_row(&row)?;

        self.feed.publish(ChangeEvent::StatusUpdated(status.clone()));
        Ok(status)
    }

    fn subscribe(&self, project_id: Uuid) -> Result<ChangeSubscription> {
        Ok(self.feed.subscribe(project_id))
    }
}

fn map_project_row(row: &SqliteRow) -> Result<Project> {
    Ok(Project {
        id: parse_uuid(&row.try_get::<String, _>("id")?, "id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        description: row.try_get("description")?,
    })
}

fn map_status_row(row: &SqliteRow) -> Result<Status> {
    Ok(Status {
        id: parse_uuid(&row.try_get::<String, _>("id")?, "id")?,
        project_id: parse_uuid(&row.try_get::<String, _>("project_id")?, "project_id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        position: row.try_get("position")?,
    })
}

fn map_task_row(row: &SqliteRow) -> Result<Task> {
    let priority: String = row.try_get("priority")?;
    let due_date: Option<String> = row.try_get("due_date")?;
    let status_id: Option<String> = row.try_get("status_id")?;
    let assignee_email: Option<String> = row.try_get("assignee_email")?;

    Ok(Task {
        id: parse_uuid(&row.try_get::<String, _>("id")?, "id")?,
        project_id: parse_uuid(&row.try_get::<String, _>("project_id")?, "project_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        priority: Priority::from_str(&priority)
            .map_err(|_| anyhow!("invalid priority {priority:?} in tasks.priority"))?,
        due_date: due_date
            .map(|value| {
                NaiveDate::parse_from_str(&value, DATE_FORMAT)
                    .with_context(|| format!("invalid date {value:?} in tasks.due_date"))
            })
            .transpose()?,
        status_id: status_id
            .map(|value| parse_uuid(&value, "status_id"))
            .transpose()?,
        assignee: assignee_email.map(|email| Assignee {
            email,
            full_name: row
                .try_get::<Option<String>, _>("assignee_name")
                .ok()
                .flatten(),
        }),
        position: row.try_get("position")?,
    })
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("invalid uuid {value:?} in column {column}"))
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn is_duplicate_column_err(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.message().contains("duplicate column name")
    )
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn seeded(store: &SqliteStore) -> Result<(Project, Vec<Status>)> {
        let project = store
            .create_project(NewProject {
                name: "Roadmap".to_string(),
                color: "#22c55e".to_string(),
                description: Some("Q3".to_string()),
            })
            .await?;
        let statuses = store.create_default_statuses(project.id).await?;
        Ok((project, statuses))
    }

    fn new_task(title: &str, status_id: Option<Uuid>) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: None,
            priority: Priority::High,
            due_date: NaiveDate::from_ymd_opt(2026, 3, 14),
            status_id,
        }
    }

    #[tokio::test]
    async fn test_open_creates_database_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("taskboard.sqlite");
        let store = SqliteStore::open(&path).await?;
        seeded(&store).await?;
        assert!(path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_data_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("taskboard.sqlite");
        let project_id = {
            let store = SqliteStore::open(&path).await?;
            let (project, statuses) = seeded(&store).await?;
            store
                .create_task(project.id, new_task("persisted", Some(statuses[1].id)))
                .await?;
            project.id
        };

        let reopened = SqliteStore::open(&path).await?;
        let tasks = reopened.list_tasks(project_id).await?;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "persisted");
        assert_eq!(reopened.list_projects().await?[0].description.as_deref(), Some("Q3"));
        Ok(())
    }

    #[tokio::test]
    async fn test_task_crud() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        let (project, statuses) = seeded(&store).await?;
        let todo = statuses[0].id;

        let first = store.create_task(project.id, new_task("first", Some(todo))).await?;
        let second = store.create_task(project.id, new_task("second", Some(todo))).await?;
        let loose = store.create_task(project.id, new_task("loose", None)).await?;
        assert_eq!(first.position, 0);
        assert_eq!(second.position, POSITION_STEP);
        assert_eq!(loose.position, 0);
        assert_eq!(first.priority, Priority::High);
        assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2026, 3, 14));

        let moved = store
            .update_task(
                second.id,
                TaskPatch {
                    status_id: Some(Some(statuses[3].id)),
                    position: Some(0),
                    due_date: Some(None),
                    ..TaskPatch::default()
                },
            )
            .await?;
        assert_eq!(moved.status_id, Some(statuses[3].id));
        assert_eq!(moved.due_date, None);
        assert_eq!(moved.title, "second");

        store.delete_task(first.id).await?;
        assert!(store.delete_task(first.id).await.is_err());
        assert_eq!(store.list_tasks(project.id).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_statuses_listed_by_position() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        let (project, statuses) = seeded(&store).await?;

        let renamed = store.update_status_name(statuses[2].id, "  QA ").await?;
        assert_eq!(renamed.name, "QA");
        assert!(store.update_status_name(statuses[2].id, "   ").await.is_err());

        let positions = store
            .list_statuses(project.id)
            .await?
            .iter()
            .map(|status| status.position)
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_publish_change_events() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        let (project, statuses) = seeded(&store).await?;
        let mut sub = store.subscribe(project.id)?;

        let task = store
            .create_task(project.id, new_task("watched", Some(statuses[0].id)))
            .await?;
        store.update_status_name(statuses[0].id, "Backlog").await?;
        store.delete_task(task.id).await?;

        assert_eq!(sub.recv().await?, ChangeEvent::TaskCreated(task.clone()));
        assert_eq!(sub.recv().await?.kind(), "status_updated");
        assert_eq!(
            sub.recv().await?,
            ChangeEvent::TaskDeleted {
                id: task.id,
                project_id: project.id
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_create_task_rejects_foreign_status() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        let (project, _) = seeded(&store).await?;
        let (_, other_statuses) = seeded(&store).await?;

        let result = store
            .create_task(project.id, new_task("misplaced", Some(other_statuses[0].id)))
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_migrations_are_repeatable() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        store.run_migrations().await?;
        store.run_migrations().await?;
        Ok(())
    }
}
