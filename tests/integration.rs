use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tempfile::TempDir;
use uuid::Uuid;

use taskboard::board::drag::{DropOutcome, DropTarget};
use taskboard::board::edit::{CommitOutcome, EditState, EditTarget};
use taskboard::board::{Bucket, Placement};
use taskboard::error::{BoardError, ValidationError, WriteOperation};
use taskboard::session::{Handled, ProjectSession, SessionOptions};
use taskboard::store::{BoardStore, MemoryStore, SqliteStore};
use taskboard::types::{ChangeEvent, NewProject, NewTask, Priority, Status, Task};

async fn project(store: &dyn BoardStore, name: &str) -> Result<Uuid> {
    let project = store
        .create_project(NewProject {
            name: name.to_string(),
            color: "#3b82f6".to_string(),
            description: None,
        })
        .await?;
    Ok(project.id)
}

fn new_task(title: &str, status_id: Uuid) -> NewTask {
    NewTask {
        title: title.to_string(),
        description: None,
        priority: Priority::Medium,
        due_date: None,
        status_id: Some(status_id),
    }
}

fn column(session: &ProjectSession, name: &str) -> Uuid {
    session
        .board()
        .status_by_name(name)
        .map(|status| status.id)
        .unwrap_or_else(|| panic!("column {name} should exist"))
}

fn titles_in(session: &ProjectSession, name: &str) -> Vec<String> {
    session
        .board()
        .tasks_in_status(column(session, name))
        .into_iter()
        .map(|task| task.title.clone())
        .collect()
}

async fn open(store: &MemoryStore, project_id: Uuid) -> Result<ProjectSession> {
    ProjectSession::open(Arc::new(store.clone()), project_id, SessionOptions::default()).await
}

#[tokio::test]
async fn drag_to_done_is_immediate_and_persisted() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Launch").await?;
    let mut session = open(&store, project_id).await?;
    let todo = column(&session, "To Do");
    let done = column(&session, "Done");
    let task = session.create_task(new_task("Ship it", todo)).await?;

    session.pick_up(task.id)?;
    session.hover(Some(DropTarget::Column(done)));
    assert!(matches!(session.drop_task(), DropOutcome::Moved(_)));
    assert_eq!(session.board().task(task.id).unwrap().status_id, Some(done));

    assert!(session.settle().await.is_empty());
    let stored = store.list_tasks(project_id).await?;
    assert_eq!(stored[0].status_id, Some(done));
    assert_eq!(session.board().task(task.id).unwrap().status_id, Some(done));
    assert_eq!(session.pending_writes(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_drag_reverts_to_original_column() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Launch").await?;
    let mut session = open(&store, project_id).await?;
    let todo = column(&session, "To Do");
    let done = column(&session, "Done");
    let task = session.create_task(new_task("Ship it", todo)).await?;

    store.fail_writes(1);
    session.move_task(task.id, DropTarget::Column(done))?;
    assert_eq!(titles_in(&session, "Done"), vec!["Ship it"]);

    let failures = session.settle().await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        BoardError::WriteFailure {
            operation: WriteOperation::MoveTask,
            ..
        }
    ));
    assert_eq!(titles_in(&session, "To Do"), vec!["Ship it"]);
    assert!(titles_in(&session, "Done").is_empty());

    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Error moving task");
    Ok(())
}

#[tokio::test]
async fn dropping_on_current_column_writes_nothing() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Launch").await?;
    let mut session = open(&store, project_id).await?;
    let todo = column(&session, "To Do");
    let task = session.create_task(new_task("Stay", todo)).await?;
    let before = session.board().clone();
    let writes = store.write_count();

    let outcome = session.move_task(task.id, DropTarget::Column(todo))?;
    assert_eq!(outcome, DropOutcome::Unchanged);
    assert!(session.settle().await.is_empty());
    assert_eq!(store.write_count(), writes);
    assert_eq!(session.board(), &before);
    Ok(())
}

#[tokio::test]
async fn drop_between_tasks_orders_the_column() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Launch").await?;
    let mut session = open(&store, project_id).await?;
    let todo = column(&session, "To Do");
    let review = column(&session, "Review");
    let first = session.create_task(new_task("First", review)).await?;
    session.create_task(new_task("Second", review)).await?;
    let mover = session.create_task(new_task("Mover", todo)).await?;

    session.move_task(
        mover.id,
        DropTarget::Task {
            task_id: first.id,
            placement: Placement::After,
        },
    )?;
    assert!(session.settle().await.is_empty());
    assert_eq!(titles_in(&session, "Review"), vec!["First", "Mover", "Second"]);

    let mut stored = store
        .list_tasks(project_id)
        .await?
        .into_iter()
        .filter(|task| task.status_id == Some(review))
        .collect::<Vec<_>>();
    stored.sort_by_key(|task| task.position);
    let stored_titles = stored.iter().map(|task| task.title.as_str()).collect::<Vec<_>>();
    assert_eq!(stored_titles, vec!["First", "Mover", "Second"]);
    Ok(())
}

#[tokio::test]
async fn moves_propagate_between_clients() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Shared").await?;
    let mut alice = open(&store, project_id).await?;
    let mut bob = open(&store, project_id).await?;
    bob.drain_ready();

    let todo = column(&alice, "To Do");
    let progress = column(&alice, "In Progress");
    let task = alice.create_task(new_task("Pair on it", todo)).await?;
    bob.drain_ready();
    assert_eq!(titles_in(&bob, "To Do"), vec!["Pair on it"]);

    alice.move_task(task.id, DropTarget::Column(progress))?;
    assert!(alice.settle().await.is_empty());
    let handled = bob.drain_ready();
    assert!(
        handled
            .iter()
            .any(|step| matches!(step, Handled::Remote(_)))
    );
    assert_eq!(titles_in(&bob, "In Progress"), vec!["Pair on it"]);
    assert!(titles_in(&bob, "To Do").is_empty());
    assert!(bob.board().check_invariants().is_ok());
    Ok(())
}

#[tokio::test]
async fn remote_delete_during_drag_removes_task() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Shared").await?;
    let mut alice = open(&store, project_id).await?;
    let mut bob = open(&store, project_id).await?;
    let todo = column(&alice, "To Do");
    let done = column(&alice, "Done");
    let task = alice.create_task(new_task("Doomed", todo)).await?;
    bob.drain_ready();

    bob.pick_up(task.id)?;
    bob.hover(Some(DropTarget::Column(done)));

    alice.delete_task(task.id)?;
    assert!(alice.settle().await.is_empty());
    bob.drain_ready();

    assert!(!bob.board().contains_task(task.id));
    assert_eq!(bob.drop_task(), DropOutcome::Cancelled);
    assert!(bob.settle().await.is_empty());
    assert!(!bob.board().contains_task(task.id));
    assert!(store.list_tasks(project_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn whitespace_title_keeps_editor_open() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Launch").await?;
    let mut session = open(&store, project_id).await?;
    let todo = column(&session, "To Do");
    let task = session.create_task(new_task("Keep me", todo)).await?;

    session.begin_edit(EditTarget::TaskTitle(task.id))?;
    session.set_draft("   \t ");
    assert_eq!(session.commit_edit(), Err(ValidationError::EmptyTitle));
    assert!(matches!(session.edit_state(), EditState::Editing(_)));
    assert_eq!(session.board().task(task.id).unwrap().title, "Keep me");

    session.set_draft("  Renamed  ");
    assert!(matches!(session.commit_edit()?, CommitOutcome::Committed(_)));
    assert!(session.settle().await.is_empty());
    assert_eq!(store.list_tasks(project_id).await?[0].title, "Renamed");
    Ok(())
}

#[tokio::test]
async fn remote_rename_waits_behind_open_editor() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Shared").await?;
    let mut alice = open(&store, project_id).await?;
    let mut bob = open(&store, project_id).await?;
    let todo = column(&alice, "To Do");
    let task = alice.create_task(new_task("Original", todo)).await?;
    bob.drain_ready();

    bob.begin_edit(EditTarget::TaskTitle(task.id))?;
    bob.set_draft("Bob's draft");

    alice.rename(EditTarget::TaskTitle(task.id), "Alice's title")?;
    assert!(alice.settle().await.is_empty());
    bob.drain_ready();

    assert_eq!(bob.board().task(task.id).unwrap().title, "Original");
    match bob.edit_state() {
        EditState::Editing(draft) => assert_eq!(draft.draft, "Bob's draft"),
        EditState::Viewing => panic!("editor should stay open"),
    }

    assert!(bob.cancel_edit());
    assert_eq!(bob.board().task(task.id).unwrap().title, "Alice's title");
    Ok(())
}

#[tokio::test]
async fn status_rename_round_trips_through_feed() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Shared").await?;
    let mut alice = open(&store, project_id).await?;
    let mut bob = open(&store, project_id).await?;
    bob.drain_ready();
    let review = column(&alice, "Review");

    alice.rename(EditTarget::StatusName(review), "QA")?;
    assert!(alice.settle().await.is_empty());
    bob.drain_ready();

    assert_eq!(bob.board().status(review).unwrap().name, "QA");
    assert_eq!(
        store
            .list_statuses(project_id)
            .await?
            .iter()
            .map(|status| status.name.as_str())
            .collect::<Vec<_>>(),
        vec!["To Do", "In Progress", "QA", "Done"]
    );
    Ok(())
}

#[tokio::test]
async fn statuses_sort_by_position_whatever_the_arrival_order() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Ordered").await?;
    let mut session = open(&store, project_id).await?;
    let existing = session
        .board()
        .all_statuses()
        .into_iter()
        .cloned()
        .collect::<Vec<Status>>();

    for status in existing.iter().rev() {
        session.apply_remote(ChangeEvent::StatusUpdated(status.clone()));
    }
    let positions = session
        .board()
        .all_statuses()
        .iter()
        .map(|status| status.position)
        .collect::<Vec<_>>();
    assert_eq!(positions, vec![0, 1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn replayed_update_is_idempotent() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Replay").await?;
    let mut session = open(&store, project_id).await?;
    let todo = column(&session, "To Do");
    let task = session.create_task(new_task("Replay me", todo)).await?;

    let updated = Task {
        title: "Replayed".to_string(),
        due_date: NaiveDate::from_ymd_opt(2026, 3, 1),
        ..task
    };
    session.apply_remote(ChangeEvent::TaskUpdated(updated.clone()));
    let once = session.board().clone();
    session.apply_remote(ChangeEvent::TaskUpdated(updated));
    assert_eq!(session.board(), &once);
    Ok(())
}

#[tokio::test]
async fn update_for_missed_create_inserts_task() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Late").await?;
    let mut session = open(&store, project_id).await?;
    let done = column(&session, "Done");

    let stray = Task {
        id: Uuid::new_v4(),
        project_id,
        title: "Arrived late".to_string(),
        description: None,
        priority: Priority::High,
        due_date: None,
        status_id: Some(done),
        assignee: None,
        position: 0,
    };
    session.apply_remote(ChangeEvent::TaskUpdated(stray.clone()));
    assert_eq!(session.board().bucket_of(&stray), Bucket::Status(done));
    assert_eq!(titles_in(&session, "Done"), vec!["Arrived late"]);
    Ok(())
}

#[tokio::test]
async fn closed_session_stops_receiving() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Quiet").await?;
    let session = open(&store, project_id).await?;
    let before = store.feed().subscriber_count();
    session.close();
    assert_eq!(store.feed().subscriber_count(), before - 1);
    Ok(())
}

#[tokio::test]
async fn refresh_recovers_after_missed_events() -> Result<()> {
    let store = MemoryStore::new();
    let project_id = project(&store, "Offline").await?;
    let mut session = open(&store, project_id).await?;
    let todo = column(&session, "To Do");

    store
        .create_task(project_id, new_task("Written elsewhere", todo))
        .await?;
    session.refresh().await?;
    assert_eq!(titles_in(&session, "To Do"), vec!["Written elsewhere"]);
    Ok(())
}

#[tokio::test]
async fn sqlite_session_persists_across_reopen() -> Result<()> {
    let temp = TempDir::new()?;
    let db_path = temp.path().join("board").join("taskboard.sqlite");

    let (project_id, task_id, done) = {
        let store = SqliteStore::open(&db_path).await?;
        let project_id = project(&store, "Durable").await?;
        let mut session =
            ProjectSession::open(Arc::new(store), project_id, SessionOptions::default()).await?;
        let todo = column(&session, "To Do");
        let done = column(&session, "Done");
        let task = session.create_task(new_task("Persist me", todo)).await?;

        session.move_task(task.id, DropTarget::Column(done))?;
        session.rename(EditTarget::TaskTitle(task.id), "Persisted")?;
        assert!(session.settle().await.is_empty());
        session.close();
        (project_id, task.id, done)
    };

    let reopened = SqliteStore::open(&db_path).await?;
    let tasks = reopened.list_tasks(project_id).await?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task_id);
    assert_eq!(tasks[0].title, "Persisted");
    assert_eq!(tasks[0].status_id, Some(done));
    assert_eq!(reopened.list_statuses(project_id).await?.len(), 4);
    Ok(())
}
