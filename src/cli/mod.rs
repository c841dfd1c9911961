use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Subcommand};
use serde_json::{Value, json};
use tracing::error;
use uuid::Uuid;

use crate::board::drag::{DropOutcome, DropTarget};
use crate::board::edit::{CommitOutcome, EditTarget};
use crate::board::{Board, Placement};
use crate::error::{BoardError, ValidationError};
use crate::session::{ProjectSession, SessionOptions};
use crate::store::BoardStore;
use crate::types::{NewProject, NewTask, Priority, Project, Status, Task, TaskPatch};

const SCHEMA_VERSION: &str = "cli.v1";
const DEFAULT_PROJECT_COLOR: &str = "#6b7280";

#[derive(Debug, Clone, Subcommand)]
pub enum RootCommand {
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
    Status {
        #[command(subcommand)]
        command: StatusCommand,
    },
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Print every column with its tasks.
    Board(ProjectArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum ProjectCommand {
    List,
    Create(ProjectCreateArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum StatusCommand {
    List(ProjectArgs),
    Rename(StatusRenameArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum TaskCommand {
    List(TaskListArgs),
    Create(TaskCreateArgs),
    Move(TaskMoveArgs),
    Rename(TaskRenameArgs),
    /// Change any of a task's fields in one write.
    Edit(TaskEditArgs),
    Delete(TaskDeleteArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    /// Project id or name.
    #[arg(long, value_name = "PROJECT")]
    pub project: String,
}

#[derive(Debug, Clone, Args)]
pub struct ProjectCreateArgs {
    #[arg(long, value_name = "TEXT")]
    pub name: String,

    #[arg(long, value_name = "HEX")]
    pub color: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusRenameArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, value_name = "STATUS")]
    pub id: String,

    #[arg(long, value_name = "TEXT")]
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct TaskListArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, value_name = "STATUS")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TaskCreateArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, value_name = "TEXT")]
    pub title: String,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,

    #[arg(long, value_name = "LEVEL")]
    pub priority: Option<String>,

    #[arg(long, value_name = "YYYY-MM-DD")]
    pub due: Option<String>,

    /// Column to create the task in; defaults to the first one.
    #[arg(long, value_name = "STATUS")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct AnchorArgs {
    #[arg(long, value_name = "TASK_ID", conflicts_with = "after")]
    pub before: Option<String>,

    #[arg(long, value_name = "TASK_ID")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TaskMoveArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, value_name = "TASK_ID")]
    pub id: String,

    #[arg(long, value_name = "STATUS")]
    pub status: String,

    #[command(flatten)]
    pub anchor: AnchorArgs,
}

#[derive(Debug, Clone, Args)]
pub struct TaskRenameArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, value_name = "TASK_ID")]
    pub id: String,

    #[arg(long, value_name = "TEXT")]
    pub title: String,
}

#[derive(Debug, Clone, Args)]
pub struct TaskEditArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, value_name = "TASK_ID")]
    pub id: String,

    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    /// An empty value clears the description.
    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,

    #[arg(long, value_name = "LEVEL")]
    pub priority: Option<String>,

    /// `none` clears the due date.
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub due: Option<String>,

    #[arg(long, value_name = "STATUS")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TaskDeleteArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, value_name = "TASK_ID")]
    pub id: String,
}

pub async fn run(
    store: Arc<dyn BoardStore>,
    options: SessionOptions,
    command: RootCommand,
    json_output: bool,
    quiet: bool,
) -> i32 {
    match execute(store, options, command).await {
        Ok(output) => {
            print_success(output, json_output, quiet);
            0
        }
        Err(err) => {
            print_error(&err, json_output);
            err.exit_code
        }
    }
}

#[derive(Debug)]
struct CommandOutput {
    command: &'static str,
    project: Option<String>,
    data: Value,
    text: String,
}

#[derive(Debug)]
struct CliError {
    exit_code: i32,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

type CliResult<T> = Result<T, CliError>;

async fn execute(
    store: Arc<dyn BoardStore>,
    options: SessionOptions,
    command: RootCommand,
) -> CliResult<CommandOutput> {
    match command {
        RootCommand::Project { command } => match command {
            ProjectCommand::List => project_list(store.as_ref()).await,
            ProjectCommand::Create(args) => project_create(store.as_ref(), args).await,
        },
        RootCommand::Status { command } => match command {
            StatusCommand::List(args) => {
                let session = open_session(store, options, &args.project).await?;
                let output = status_list(&session);
                session_done(session, output).await
            }
            StatusCommand::Rename(args) => {
                let mut session = open_session(store, options, &args.project.project).await?;
                let output = status_rename(&mut session, args);
                session_done(session, output).await
            }
        },
        RootCommand::Task { command } => {
            let project = match &command {
                TaskCommand::List(args) => &args.project,
                TaskCommand::Create(args) => &args.project,
                TaskCommand::Move(args) => &args.project,
                TaskCommand::Rename(args) => &args.project,
                TaskCommand::Edit(args) => &args.project,
                TaskCommand::Delete(args) => &args.project,
            };
            let mut session = open_session(store, options, &project.project).await?;
            let output = match command {
                TaskCommand::List(args) => task_list(&session, args),
                TaskCommand::Create(args) => task_create(&mut session, args).await,
                TaskCommand::Move(args) => task_move(&mut session, args),
                TaskCommand::Rename(args) => task_rename(&mut session, args),
                TaskCommand::Edit(args) => task_edit(&mut session, args),
                TaskCommand::Delete(args) => task_delete(&mut session, args),
            };
            session_done(session, output).await
        }
        RootCommand::Board(args) => {
            let session = open_session(store, options, &args.project).await?;
            let output = board_show(&session);
            session_done(session, output).await
        }
    }
}

async fn open_session(
    store: Arc<dyn BoardStore>,
    options: SessionOptions,
    selector: &str,
) -> CliResult<ProjectSession> {
    let project = resolve_project(store.as_ref(), selector).await?;
    ProjectSession::open(store, project.id, options)
        .await
        .map_err(classify_store_error)
}

/// Waits for background writes, then closes the session. A failed write
/// turns a successful command into an error.
async fn session_done(
    mut session: ProjectSession,
    output: CliResult<CommandOutput>,
) -> CliResult<CommandOutput> {
    let failures = session.settle().await;
    session.close();
    let output = output?;
    match failures.into_iter().next() {
        Some(failure) => Err(board_error(failure)),
        None => Ok(output),
    }
}

async fn project_list(store: &dyn BoardStore) -> CliResult<CommandOutput> {
    let projects = store.list_projects().await.map_err(classify_store_error)?;
    let text = if projects.is_empty() {
        "No projects found.".to_string()
    } else {
        let rows = projects
            .iter()
            .map(|project| {
                vec![
                    short_id(project.id),
                    project.name.replace('\n', " "),
                    project.color.clone(),
                    project.description.clone().unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect::<Vec<_>>();
        render_text_table(&["ID", "Name", "Color", "Description"], &rows)
    };

    Ok(CommandOutput {
        command: "project list",
        project: None,
        data: json!({ "projects": projects.iter().map(project_json).collect::<Vec<_>>() }),
        text,
    })
}

async fn project_create(store: &dyn BoardStore, args: ProjectCreateArgs) -> CliResult<CommandOutput> {
    let name = args.name.trim().to_string();
    if name.is_empty() {
        return Err(validation_error(ValidationError::EmptyProjectName));
    }
    let existing = store.list_projects().await.map_err(classify_store_error)?;
    if existing
        .iter()
        .any(|project| project.name.eq_ignore_ascii_case(&name))
    {
        return Err(conflict_error(
            "PROJECT_EXISTS",
            format!("project '{name}' already exists"),
            None,
        ));
    }

    let created = store
        .create_project(NewProject {
            name,
            color: args
                .color
                .unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string()),
            description: args.description,
        })
        .await
        .map_err(classify_store_error)?;
    store
        .create_default_statuses(created.id)
        .await
        .map_err(classify_store_error)?;

    Ok(CommandOutput {
        command: "project create",
        project: Some(created.name.clone()),
        data: json!({ "project": project_json(&created) }),
        text: format!("created project {} ({})", created.name, created.id),
    })
}

fn status_list(session: &ProjectSession) -> CliResult<CommandOutput> {
    let board = session.board();
    let statuses = board.all_statuses();
    let rows = statuses
        .iter()
        .map(|status| {
            vec![
                short_id(status.id),
                status.name.replace('\n', " "),
                status.position.to_string(),
                board.tasks_in_status(status.id).len().to_string(),
                status.color.clone(),
            ]
        })
        .collect::<Vec<_>>();

    Ok(CommandOutput {
        command: "status list",
        project: Some(session.project_id().to_string()),
        data: json!({
            "statuses": statuses.iter().map(|status| status_json(status)).collect::<Vec<_>>()
        }),
        text: render_text_table(&["ID", "Name", "Pos", "Tasks", "Color"], &rows),
    })
}

fn status_rename(session: &mut ProjectSession, args: StatusRenameArgs) -> CliResult<CommandOutput> {
    let status_id = resolve_status(session.board(), &args.id)?;
    let outcome = session
        .rename(EditTarget::StatusName(status_id), args.name)
        .map_err(validation_error)?;
    let status = session
        .board()
        .status(status_id)
        .ok_or_else(|| not_found_error("STATUS_NOT_FOUND", format!("status {status_id} not found")))?;

    let text = match outcome {
        CommitOutcome::Closed => format!("status {} unchanged", status.name),
        CommitOutcome::Committed(commit) => {
            format!("renamed status '{}' to '{}'", commit.previous, commit.value)
        }
    };
    Ok(CommandOutput {
        command: "status rename",
        project: Some(session.project_id().to_string()),
        data: json!({ "status": status_json(status) }),
        text,
    })
}

fn task_list(session: &ProjectSession, args: TaskListArgs) -> CliResult<CommandOutput> {
    let board = session.board();
    let tasks = match args.status.as_deref() {
        Some(selector) => board.tasks_in_status(resolve_status(board, selector)?),
        None => {
            let mut all = board
                .columns()
                .into_iter()
                .flat_map(|column| column.tasks)
                .collect::<Vec<_>>();
            all.extend(board.unassigned());
            all
        }
    };

    let text = if tasks.is_empty() {
        "No tasks found.".to_string()
    } else {
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    short_id(task.id),
                    status_label(board, task),
                    task.priority.to_string(),
                    task.due_date
                        .map(|date| date.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    task.title.replace('\n', " "),
                ]
            })
            .collect::<Vec<_>>();
        render_text_table(&["ID", "Status", "Priority", "Due", "Title"], &rows)
    };

    Ok(CommandOutput {
        command: "task list",
        project: Some(session.project_id().to_string()),
        data: json!({
            "tasks": tasks.iter().map(|task| task_json(board, task)).collect::<Vec<_>>()
        }),
        text,
    })
}

async fn task_create(
    session: &mut ProjectSession,
    args: TaskCreateArgs,
) -> CliResult<CommandOutput> {
    let priority = match args.priority.as_deref() {
        Some(raw) => parse_priority(raw)?,
        None => Priority::default(),
    };
    let due_date = args.due.as_deref().map(parse_due_date).transpose()?;
    let status_id = match args.status.as_deref() {
        Some(selector) => resolve_status(session.board(), selector)?,
        None => session
            .board()
            .all_statuses()
            .first()
            .map(|status| status.id)
            .ok_or_else(|| not_found_error("STATUS_NOT_FOUND", "project has no columns"))?,
    };

    let created = session
        .create_task(NewTask {
            title: args.title,
            description: args.description,
            priority,
            due_date,
            status_id: Some(status_id),
        })
        .await
        .map_err(board_error)?;

    Ok(CommandOutput {
        command: "task create",
        project: Some(session.project_id().to_string()),
        data: json!({ "task": task_json(session.board(), &created) }),
        text: format!("created task {} ({})", created.title, created.id),
    })
}

fn task_move(session: &mut ProjectSession, args: TaskMoveArgs) -> CliResult<CommandOutput> {
    let task_id = resolve_task(session.board(), &args.id)?;
    let status_id = resolve_status(session.board(), &args.status)?;

    let anchor = match (&args.anchor.before, &args.anchor.after) {
        (Some(selector), _) => Some((resolve_task(session.board(), selector)?, Placement::Before)),
        (None, Some(selector)) => Some((resolve_task(session.board(), selector)?, Placement::After)),
        (None, None) => None,
    };
    let target = match anchor {
        Some((anchor_id, placement)) => {
            let anchor_status = session.board().task(anchor_id).and_then(|task| task.status_id);
            if anchor_status != Some(status_id) {
                return Err(usage_error(
                    "ANCHOR_STATUS_MISMATCH",
                    format!("task {} is not in status {}", short_id(anchor_id), args.status),
                ));
            }
            DropTarget::Task {
                task_id: anchor_id,
                placement,
            }
        }
        None => DropTarget::Column(status_id),
    };

    let outcome = session
        .move_task(task_id, target)
        .map_err(validation_error)?;
    let text = match &outcome {
        DropOutcome::Moved(intent) => format!(
            "moved task {} to {}",
            short_id(intent.task_id),
            status_name(session.board(), intent.to_status)
        ),
        DropOutcome::Unchanged => format!(
            "task {} already in {}",
            short_id(task_id),
            status_name(session.board(), status_id)
        ),
        DropOutcome::Cancelled => {
            return Err(runtime_error(format!(
                "move of task {} could not be resolved",
                short_id(task_id)
            )));
        }
    };

    let task = find_task(session.board(), task_id)?;
    Ok(CommandOutput {
        command: "task move",
        project: Some(session.project_id().to_string()),
        data: json!({
            "moved": matches!(outcome, DropOutcome::Moved(_)),
            "task": task_json(session.board(), task)
        }),
        text,
    })
}

fn task_rename(session: &mut ProjectSession, args: TaskRenameArgs) -> CliResult<CommandOutput> {
    let task_id = resolve_task(session.board(), &args.id)?;
    let outcome = session
        .rename(EditTarget::TaskTitle(task_id), args.title)
        .map_err(validation_error)?;

    let task = find_task(session.board(), task_id)?;
    let text = match outcome {
        CommitOutcome::Closed => format!("task {} unchanged", short_id(task_id)),
        CommitOutcome::Committed(commit) => format!("renamed task to '{}'", commit.value),
    };
    Ok(CommandOutput {
        command: "task rename",
        project: Some(session.project_id().to_string()),
        data: json!({ "task": task_json(session.board(), task) }),
        text,
    })
}

fn task_edit(session: &mut ProjectSession, args: TaskEditArgs) -> CliResult<CommandOutput> {
    let task_id = resolve_task(session.board(), &args.id)?;
    let patch = TaskPatch {
        title: args.title,
        description: args.description.map(|text| {
            let text = text.trim().to_string();
            (!text.is_empty()).then_some(text)
        }),
        priority: args.priority.as_deref().map(parse_priority).transpose()?,
        due_date: match args.due.as_deref() {
            Some(raw) if raw.trim().eq_ignore_ascii_case("none") => Some(None),
            Some(raw) => Some(Some(parse_due_date(raw)?)),
            None => None,
        },
        status_id: args
            .status
            .as_deref()
            .map(|selector| resolve_status(session.board(), selector))
            .transpose()?
            .map(Some),
        position: None,
    };
    if patch.is_empty() {
        return Err(usage_error(
            "NOTHING_TO_EDIT",
            "pass at least one of --title, --description, --priority, --due or --status",
        ));
    }

    let changed = session
        .update_task(task_id, patch)
        .map_err(validation_error)?;
    let task = find_task(session.board(), task_id)?;
    let text = match changed {
        Some(task) => format!("updated task {} ({})", task.title, short_id(task.id)),
        None => format!("task {} unchanged", short_id(task_id)),
    };
    Ok(CommandOutput {
        command: "task edit",
        project: Some(session.project_id().to_string()),
        data: json!({ "task": task_json(session.board(), task) }),
        text,
    })
}

fn task_delete(session: &mut ProjectSession, args: TaskDeleteArgs) -> CliResult<CommandOutput> {
    let task_id = resolve_task(session.board(), &args.id)?;
    session.delete_task(task_id).map_err(validation_error)?;

    Ok(CommandOutput {
        command: "task delete",
        project: Some(session.project_id().to_string()),
        data: json!({ "deleted": task_id.to_string() }),
        text: format!("deleted task {task_id}"),
    })
}

fn board_show(session: &ProjectSession) -> CliResult<CommandOutput> {
    let board = session.board();
    let mut sections = Vec::new();
    let mut columns = Vec::new();

    for column in board.columns() {
        sections.push(render_column(&column.status.name, &column.tasks));
        columns.push(json!({
            "status": status_json(column.status),
            "tasks": column.tasks.iter().map(|task| task_json(board, task)).collect::<Vec<_>>()
        }));
    }
    let unassigned = board.unassigned();
    if !unassigned.is_empty() {
        sections.push(render_column("Unassigned", &unassigned));
    }

    Ok(CommandOutput {
        command: "board",
        project: Some(session.project_id().to_string()),
        data: json!({
            "columns": columns,
            "unassigned": unassigned.iter().map(|task| task_json(board, task)).collect::<Vec<_>>()
        }),
        text: sections.join("\n\n"),
    })
}

fn parse_priority(raw: &str) -> CliResult<Priority> {
    Priority::from_str(raw).map_err(|()| {
        usage_error(
            "INVALID_PRIORITY",
            format!("unknown priority '{raw}'; use low, medium, high or urgent"),
        )
    })
}

fn parse_due_date(raw: &str) -> CliResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        usage_error("INVALID_DATE", format!("invalid due date '{raw}'; use YYYY-MM-DD"))
    })
}

fn render_column(name: &str, tasks: &[&Task]) -> String {
    let mut lines = vec![format!("{name} ({})", tasks.len())];
    if tasks.is_empty() {
        lines.push("  (empty)".to_string());
    }
    for task in tasks {
        let mut line = format!("  {}  {}", short_id(task.id), task.title.replace('\n', " "));
        if task.priority != Priority::Medium {
            line.push_str(&format!(" [{}]", task.priority));
        }
        if let Some(due) = task.due_date {
            line.push_str(&format!(" due {due}"));
        }
        if let Some(assignee) = &task.assignee {
            line.push_str(&format!(" @{}", assignee.initials()));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn render_text_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = format!(
        "+{}+",
        widths
            .iter()
            .map(|width| "-".repeat(width + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let render_row = |cells: Vec<&str>| {
        let padded = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>();
        format!("| {} |", padded.join(" | "))
    };

    let mut lines = vec![border.clone(), render_row(headers.to_vec()), border.clone()];
    for row in rows {
        lines.push(render_row(row.iter().map(String::as_str).collect()));
    }
    lines.push(border);
    lines.join("\n")
}

async fn resolve_project(store: &dyn BoardStore, selector: &str) -> CliResult<Project> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err(usage_error("PROJECT_REQUIRED", "--project cannot be empty"));
    }
    let projects = store.list_projects().await.map_err(classify_store_error)?;

    if let Ok(id) = Uuid::parse_str(trimmed)
        && let Some(project) = projects.iter().find(|project| project.id == id)
    {
        return Ok(project.clone());
    }

    let matches = projects
        .into_iter()
        .filter(|project| project.name.eq_ignore_ascii_case(trimmed))
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [single] => Ok(single.clone()),
        [] => Err(not_found_error(
            "PROJECT_NOT_FOUND",
            format!("project '{trimmed}' not found"),
        )),
        many => Err(conflict_error(
            "PROJECT_AMBIGUOUS",
            format!("{} projects are named '{trimmed}'; use the id", many.len()),
            Some(json!({
                "matches": many.iter().map(|project| project.id.to_string()).collect::<Vec<_>>()
            })),
        )),
    }
}

/// Accepts a full id or a unique prefix of one.
fn resolve_task(board: &Board, selector: &str) -> CliResult<Uuid> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err(usage_error("TASK_ID_REQUIRED", "task id cannot be empty"));
    }
    if let Ok(id) = Uuid::parse_str(trimmed) {
        return match board.contains_task(id) {
            true => Ok(id),
            false => Err(not_found_error("TASK_NOT_FOUND", format!("task {id} not found"))),
        };
    }

    let needle = trimmed.to_ascii_lowercase();
    let mut seen = HashSet::new();
    let mut candidates = board
        .columns()
        .into_iter()
        .flat_map(|column| column.tasks)
        .collect::<Vec<_>>();
    candidates.extend(board.unassigned());
    let matches = candidates
        .into_iter()
        .map(|task| task.id)
        .filter(|id| {
            id.to_string().starts_with(&needle) || id.as_simple().to_string().starts_with(&needle)
        })
        .filter(|id| seen.insert(*id))
        .collect::<Vec<_>>();

    match matches.as_slice() {
        [single] => Ok(*single),
        [] => Err(not_found_error(
            "TASK_NOT_FOUND",
            format!("task '{selector}' not found"),
        )),
        many => Err(conflict_error(
            "TASK_ID_AMBIGUOUS",
            format!(
                "task id prefix '{selector}' matches {} tasks; use a longer id",
                many.len()
            ),
            Some(json!({
                "matches": many.iter().map(|id| id.to_string()).collect::<Vec<_>>()
            })),
        )),
    }
}

/// Accepts a status id or a column name, case-insensitively.
fn resolve_status(board: &Board, selector: &str) -> CliResult<Uuid> {
    let trimmed = selector.trim();
    if let Ok(id) = Uuid::parse_str(trimmed)
        && board.status(id).is_some()
    {
        return Ok(id);
    }
    if let Some(status) = board.status_by_name(trimmed) {
        return Ok(status.id);
    }
    let prefixed = board
        .all_statuses()
        .into_iter()
        .filter(|status| status.id.to_string().starts_with(&trimmed.to_ascii_lowercase()))
        .collect::<Vec<_>>();
    match prefixed.as_slice() {
        [single] if !trimmed.is_empty() => Ok(single.id),
        _ => Err(not_found_error(
            "STATUS_NOT_FOUND",
            format!("status '{selector}' not found"),
        )),
    }
}

fn find_task(board: &Board, task_id: Uuid) -> CliResult<&Task> {
    board
        .task(task_id)
        .ok_or_else(|| not_found_error("TASK_NOT_FOUND", format!("task {task_id} not found")))
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn status_name(board: &Board, status_id: Uuid) -> String {
    board
        .status(status_id)
        .map(|status| status.name.clone())
        .unwrap_or_else(|| status_id.to_string())
}

fn status_label(board: &Board, task: &Task) -> String {
    task.status_id
        .and_then(|id| board.status(id))
        .map(|status| status.name.clone())
        .unwrap_or_else(|| "Unassigned".to_string())
}

fn project_json(project: &Project) -> Value {
    json!({
        "id": project.id,
        "name": project.name,
        "color": project.color,
        "description": project.description
    })
}

fn status_json(status: &Status) -> Value {
    json!({
        "id": status.id,
        "name": status.name,
        "color": status.color,
        "position": status.position
    })
}

fn task_json(board: &Board, task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "priority": task.priority,
        "due_date": task.due_date,
        "status_id": task.status_id,
        "status": task.status_id.and_then(|id| board.status(id)).map(|status| status.name.clone()),
        "assignee": task.assignee,
        "position": task.position
    })
}

fn usage_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 2,
        code,
        message: message.into(),
        details: None,
    }
}

fn not_found_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 3,
        code,
        message: message.into(),
        details: None,
    }
}

fn conflict_error(
    code: &'static str,
    message: impl Into<String>,
    details: Option<Value>,
) -> CliError {
    CliError {
        exit_code: 4,
        code,
        message: message.into(),
        details,
    }
}

fn runtime_error(message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 5,
        code: "RUNTIME_ERROR",
        message: message.into(),
        details: None,
    }
}

fn validation_error(err: ValidationError) -> CliError {
    let message = err.to_string();
    match err {
        ValidationError::EmptyTitle => usage_error("EMPTY_TITLE", message),
        ValidationError::EmptyStatusName => usage_error("EMPTY_STATUS_NAME", message),
        ValidationError::EmptyProjectName => usage_error("EMPTY_PROJECT_NAME", message),
        ValidationError::UnknownTask(_) => not_found_error("TASK_NOT_FOUND", message),
        ValidationError::UnknownStatus(_) => not_found_error("STATUS_NOT_FOUND", message),
        ValidationError::EditInProgress => conflict_error("EDIT_IN_PROGRESS", message, None),
        ValidationError::TaskBusy(_) => conflict_error("TASK_BUSY", message, None),
    }
}

fn board_error(err: BoardError) -> CliError {
    match err {
        BoardError::Validation(err) => validation_error(err),
        BoardError::WriteFailure {
            operation,
            entity,
            message,
        } => CliError {
            exit_code: 5,
            code: "WRITE_FAILED",
            message: format!("{operation} failed: {message}"),
            details: Some(json!({ "operation": operation.as_str(), "entity": entity })),
        },
        BoardError::SubscriptionFailure(message) => CliError {
            exit_code: 5,
            code: "SUBSCRIPTION_FAILED",
            message,
            details: None,
        },
        BoardError::Store(err) => classify_store_error(err),
    }
}

fn classify_store_error(err: anyhow::Error) -> CliError {
    let message = format!("{err:#}");
    if err
        .chain()
        .any(|cause| cause.to_string().contains("constraint failed"))
    {
        return conflict_error("CONSTRAINT_VIOLATION", message, None);
    }
    if err
        .chain()
        .any(|cause| cause.to_string().ends_with("not found"))
    {
        return not_found_error("NOT_FOUND", message);
    }
    runtime_error(message)
}

fn print_success(output: CommandOutput, json_output: bool, quiet: bool) {
    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "command": output.command,
            "project": output.project,
            "data": output.data
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => println!("{value}"),
            Err(_) => println!("{payload}"),
        }
        return;
    }

    if quiet {
        return;
    }

    if output.text.is_empty() {
        println!("ok");
    } else {
        println!("{}", output.text);
    }
}

fn print_error(err: &CliError, json_output: bool) {
    error!(
        code = err.code,
        message = %err.message,
        details = ?err.details,
        "cli command failed"
    );

    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "error": {
                "code": err.code,
                "message": err.message,
                "details": err.details
            }
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => eprintln!("{value}"),
            Err(_) => eprintln!("{payload}"),
        }
        return;
    }

    eprintln!("error[{}]: {}", err.code, err.message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn setup() -> (MemoryStore, Arc<dyn BoardStore>) {
        let store = MemoryStore::new();
        let shared: Arc<dyn BoardStore> = Arc::new(store.clone());
        execute(
            Arc::clone(&shared),
            SessionOptions::default(),
            RootCommand::Project {
                command: ProjectCommand::Create(ProjectCreateArgs {
                    name: "Launch".to_string(),
                    color: None,
                    description: None,
                }),
            },
        )
        .await
        .expect("project should be created");
        (store, shared)
    }

    fn project() -> ProjectArgs {
        ProjectArgs {
            project: "launch".to_string(),
        }
    }

    async fn create(store: &Arc<dyn BoardStore>, title: &str, status: Option<&str>) -> Value {
        let output = execute(
            Arc::clone(store),
            SessionOptions::default(),
            RootCommand::Task {
                command: TaskCommand::Create(TaskCreateArgs {
                    project: project(),
                    title: title.to_string(),
                    description: None,
                    priority: Some("high".to_string()),
                    due: Some("2026-05-01".to_string()),
                    status: status.map(str::to_string),
                }),
            },
        )
        .await
        .expect("task should be created");
        output.data["task"].clone()
    }

    #[tokio::test]
    async fn task_create_defaults_to_first_column() {
        let (_store, shared) = setup().await;
        let task = create(&shared, "Write docs", None).await;
        assert_eq!(task["status"], "To Do");
        assert_eq!(task["priority"], "high");
        assert_eq!(task["due_date"], "2026-05-01");
    }

    #[tokio::test]
    async fn task_move_persists_new_status() {
        let (store, shared) = setup().await;
        let task = create(&shared, "Ship", Some("to do")).await;
        let id = task["id"].as_str().unwrap().to_string();

        let output = execute(
            Arc::clone(&shared),
            SessionOptions::default(),
            RootCommand::Task {
                command: TaskCommand::Move(TaskMoveArgs {
                    project: project(),
                    id: id[..8].to_string(),
                    status: "Done".to_string(),
                    anchor: AnchorArgs {
                        before: None,
                        after: None,
                    },
                }),
            },
        )
        .await
        .expect("move should succeed");
        assert_eq!(output.data["moved"], true);

        let project_id = store.list_projects().await.unwrap()[0].id;
        let stored = store.list_tasks(project_id).await.unwrap();
        let statuses = store.list_statuses(project_id).await.unwrap();
        assert_eq!(stored[0].status_id, Some(statuses[3].id));
    }

    #[tokio::test]
    async fn failed_move_reports_write_failure() {
        let (store, shared) = setup().await;
        let task = create(&shared, "Ship", None).await;

        store.fail_writes(1);
        let err = execute(
            Arc::clone(&shared),
            SessionOptions::default(),
            RootCommand::Task {
                command: TaskCommand::Move(TaskMoveArgs {
                    project: project(),
                    id: task["id"].as_str().unwrap().to_string(),
                    status: "Review".to_string(),
                    anchor: AnchorArgs {
                        before: None,
                        after: None,
                    },
                }),
            },
        )
        .await
        .expect_err("write failure should surface");
        assert_eq!(err.code, "WRITE_FAILED");
        assert_eq!(err.exit_code, 5);
    }

    fn edit_args(id: &str) -> TaskEditArgs {
        TaskEditArgs {
            project: project(),
            id: id.to_string(),
            title: None,
            description: None,
            priority: None,
            due: None,
            status: None,
        }
    }

    #[tokio::test]
    async fn task_edit_updates_several_fields() {
        let (store, shared) = setup().await;
        let task = create(&shared, "Draft", None).await;

        let output = execute(
            Arc::clone(&shared),
            SessionOptions::default(),
            RootCommand::Task {
                command: TaskCommand::Edit(TaskEditArgs {
                    description: Some("Longer notes".to_string()),
                    priority: Some("urgent".to_string()),
                    due: Some("none".to_string()),
                    status: Some("review".to_string()),
                    ..edit_args(task["id"].as_str().unwrap())
                }),
            },
        )
        .await
        .expect("edit should succeed");
        assert_eq!(output.data["task"]["status"], "Review");
        assert_eq!(store.feed().subscriber_count(), 0);

        let project_id = store.list_projects().await.unwrap()[0].id;
        let stored = &store.list_tasks(project_id).await.unwrap()[0];
        assert_eq!(stored.priority, Priority::Urgent);
        assert_eq!(stored.due_date, None);
        assert_eq!(stored.description.as_deref(), Some("Longer notes"));
        assert_eq!(stored.title, "Draft");
    }

    #[tokio::test]
    async fn failed_task_edit_leaves_store_untouched() {
        let (store, shared) = setup().await;
        let task = create(&shared, "Draft", None).await;

        store.fail_writes(1);
        let err = execute(
            Arc::clone(&shared),
            SessionOptions::default(),
            RootCommand::Task {
                command: TaskCommand::Edit(TaskEditArgs {
                    priority: Some("low".to_string()),
                    ..edit_args(task["id"].as_str().unwrap())
                }),
            },
        )
        .await
        .expect_err("write failure should surface");
        assert_eq!(err.code, "WRITE_FAILED");

        let project_id = store.list_projects().await.unwrap()[0].id;
        assert_eq!(
            store.list_tasks(project_id).await.unwrap()[0].priority,
            Priority::High
        );
    }

    #[tokio::test]
    async fn task_edit_without_fields_is_a_usage_error() {
        let (_store, shared) = setup().await;
        let task = create(&shared, "Draft", None).await;

        let err = execute(
            shared,
            SessionOptions::default(),
            RootCommand::Task {
                command: TaskCommand::Edit(edit_args(task["id"].as_str().unwrap())),
            },
        )
        .await
        .expect_err("empty edit should be rejected");
        assert_eq!(err.code, "NOTHING_TO_EDIT");
        assert_eq!(err.exit_code, 2);
    }

    #[tokio::test]
    async fn blank_rename_is_a_usage_error() {
        let (_store, shared) = setup().await;
        let task = create(&shared, "Named", None).await;

        let err = execute(
            Arc::clone(&shared),
            SessionOptions::default(),
            RootCommand::Task {
                command: TaskCommand::Rename(TaskRenameArgs {
                    project: project(),
                    id: task["id"].as_str().unwrap().to_string(),
                    title: "   ".to_string(),
                }),
            },
        )
        .await
        .expect_err("blank title should be rejected");
        assert_eq!(err.code, "EMPTY_TITLE");
        assert_eq!(err.exit_code, 2);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let (_store, shared) = setup().await;
        let err = execute(
            shared,
            SessionOptions::default(),
            RootCommand::Board(ProjectArgs {
                project: "missing".to_string(),
            }),
        )
        .await
        .expect_err("project should not resolve");
        assert_eq!(err.code, "PROJECT_NOT_FOUND");
        assert_eq!(err.exit_code, 3);
    }

    #[tokio::test]
    async fn duplicate_project_name_conflicts() {
        let (_store, shared) = setup().await;
        let err = execute(
            shared,
            SessionOptions::default(),
            RootCommand::Project {
                command: ProjectCommand::Create(ProjectCreateArgs {
                    name: "LAUNCH".to_string(),
                    color: None,
                    description: None,
                }),
            },
        )
        .await
        .expect_err("duplicate name should conflict");
        assert_eq!(err.code, "PROJECT_EXISTS");
    }

    #[tokio::test]
    async fn board_lists_columns_in_order() {
        let (_store, shared) = setup().await;
        create(&shared, "Review me", Some("review")).await;

        let output = execute(
            shared,
            SessionOptions::default(),
            RootCommand::Board(project()),
        )
        .await
        .expect("board should render");
        let names = output.data["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|column| column["status"]["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["To Do", "In Progress", "Review", "Done"]);
        assert_eq!(output.data["columns"][2]["tasks"][0]["title"], "Review me");
        assert!(output.text.contains("Review (1)"));
    }

    #[test]
    fn render_text_table_pads_columns() {
        let table = render_text_table(
            &["ID", "Name"],
            &[vec!["1".to_string(), "To Do".to_string()]],
        );
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "+----+-------+");
        assert_eq!(lines[1], "| ID | Name  |");
        assert_eq!(lines[3], "| 1  | To Do |");
    }

    #[test]
    fn validation_errors_map_to_exit_codes() {
        assert_eq!(validation_error(ValidationError::EmptyTitle).exit_code, 2);
        assert_eq!(
            validation_error(ValidationError::UnknownTask(Uuid::nil())).exit_code,
            3
        );
        assert_eq!(validation_error(ValidationError::TaskBusy(Uuid::nil())).exit_code, 4);
    }

    #[test]
    fn store_errors_are_classified() {
        let err = anyhow::anyhow!("task 1234 not found").context("failed to update task");
        assert_eq!(classify_store_error(err).code, "NOT_FOUND");
        let err = anyhow::anyhow!("FOREIGN KEY constraint failed").context("failed to insert task");
        assert_eq!(classify_store_error(err).code, "CONSTRAINT_VIOLATION");
    }
}
