use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use stride::models::{Priority, ProjectRole, TaskStatus, WorkspaceRole};
use stride::task::{CreateTask, TaskPatch};
use stride::{notify, project, sweep, task, workspace, Database};

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Project tracker: workspaces, sprints, task history, notifications")]
#[command(version)]
struct Cli {
    /// Acting user id (identity is established outside stride)
    #[arg(long, global = true, env = "STRIDE_USER")]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize stride in the current directory
    Init,

    /// Register a user (or refresh an existing one by email)
    Register {
        /// Display name
        name: String,
        /// Email, the unique identity anchor
        email: String,
    },

    /// Workspace management
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCommands,
    },

    /// Project management
    Project {
        #[command(subcommand)]
        action: ProjectCommands,
    },

    /// Sprint management
    Sprint {
        #[command(subcommand)]
        action: SprintCommands,
    },

    /// Task management
    Task {
        #[command(subcommand)]
        action: TaskCommands,
    },

    /// Notifications
    Notification {
        #[command(subcommand)]
        action: NotificationCommands,
    },

    /// Due-date sweep
    Sweep {
        #[command(subcommand)]
        action: SweepCommands,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// Create a workspace; you become its owner and an admin member
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List workspaces you belong to
    List,
    /// Show a workspace
    Show { id: i64 },
    /// Update name or description (admins only)
    Update {
        id: i64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a workspace and everything it owns (owner only)
    Delete { id: i64 },
    /// Add a member (admins only)
    AddMember {
        id: i64,
        user_id: i64,
        /// admin or member
        #[arg(short, long, default_value = "member")]
        role: String,
    },
    /// Remove a member (admins only)
    RemoveMember { id: i64, user_id: i64 },
    /// Change a member's role (admins only)
    SetRole {
        id: i64,
        user_id: i64,
        /// admin or member
        role: String,
    },
    /// List members
    Members { id: i64 },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project in a workspace (workspace admins only)
    Create {
        workspace_id: i64,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List projects you belong to in a workspace
    List { workspace_id: i64 },
    /// Show a project
    Show { id: i64 },
    /// Update name or description (owner or managers)
    Update {
        id: i64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a project and its tasks (owner or managers)
    Delete { id: i64 },
    /// Add a workspace member to the project (owner or managers)
    AddMember {
        id: i64,
        user_id: i64,
        /// manager, developer, or tester
        #[arg(short, long, default_value = "developer")]
        role: String,
    },
    /// Change a member's role (owner or managers)
    SetRole {
        id: i64,
        user_id: i64,
        /// manager, developer, or tester
        role: String,
    },
    /// Remove a member (owner or managers)
    RemoveMember { id: i64, user_id: i64 },
    /// List members
    Members { id: i64 },
}

#[derive(Subcommand)]
enum SprintCommands {
    /// Add a sprint to a project (owner or managers)
    Add {
        project_id: i64,
        name: String,
        /// Start date (YYYY-MM-DD or RFC3339)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD or RFC3339)
        #[arg(long)]
        end: String,
    },
    /// List sprints of a project
    List { project_id: i64 },
    /// Remove a sprint by name; its tasks drop back to no sprint
    Remove { project_id: i64, name: String },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a task in a project
    Create {
        project_id: i64,
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        /// low, medium, or high
        #[arg(short, long, default_value = "medium")]
        priority: String,
        /// pending, in-progress, or completed
        #[arg(short, long, default_value = "pending")]
        status: String,
        /// Due date (YYYY-MM-DD or RFC3339)
        #[arg(long)]
        due: Option<String>,
        /// Assignee user id
        #[arg(short, long)]
        assignee: i64,
        /// Sprint id within the same project
        #[arg(long)]
        sprint: Option<i64>,
    },
    /// List tasks of a project
    List { project_id: i64 },
    /// List tasks assigned to you
    Assigned,
    /// List tasks of a sprint
    BySprint { sprint_id: i64 },
    /// Show task detail with resolved sprint, comments, and history
    Show { id: i64 },
    /// Partially update a task; each changed field is recorded in history.
    /// Pass an empty string to clear a clearable field.
    Update {
        id: i64,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        priority: Option<String>,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(short, long)]
        assignee: Option<String>,
        #[arg(long)]
        sprint: Option<String>,
    },
    /// Add a comment to a task
    Comment { id: i64, text: String },
    /// Delete a task (task owner or project managers)
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum NotificationCommands {
    /// List your notifications, newest first
    List,
    /// Mark one notification read
    Read { id: i64 },
    /// Mark all your notifications read
    ReadAll,
}

#[derive(Subcommand)]
enum SweepCommands {
    /// Run one due-date sweep pass
    Run,
    /// Run the sweep on an interval until interrupted
    Watch {
        /// Seconds between passes
        #[arg(long, default_value_t = sweep::DEFAULT_INTERVAL.as_secs())]
        interval: u64,
    },
}

fn find_stride_dir() -> Result<PathBuf> {
    let mut current = env::current_dir()?;

    loop {
        let candidate = current.join(".stride");
        if candidate.exists() && candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            bail!("Not a stride directory (or any parent). Run 'stride init' first.");
        }
    }
}

fn db_path() -> Result<PathBuf> {
    Ok(find_stride_dir()?.join("stride.db"))
}

fn get_db() -> Result<Database> {
    Database::open(&db_path()?).context("Failed to open database")
}

fn principal(cli: &Cli) -> Result<i64> {
    cli.user
        .ok_or_else(|| anyhow::anyhow!("No acting user. Pass --user or set STRIDE_USER."))
}

fn parse_workspace_role(raw: &str) -> Result<WorkspaceRole> {
    WorkspaceRole::parse(raw)
        .ok_or_else(|| anyhow::anyhow!("Invalid role '{}'. Must be one of: admin, member", raw))
}

fn parse_project_role(raw: &str) -> Result<ProjectRole> {
    ProjectRole::parse(raw).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid role '{}'. Must be one of: manager, developer, tester",
            raw
        )
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init => {
            let dir = env::current_dir()?.join(".stride");
            if dir.exists() {
                bail!("Already initialized at {}", dir.display());
            }
            std::fs::create_dir_all(&dir)?;
            Database::open(&dir.join("stride.db"))?;
            println!("Initialized stride in {}", dir.display());
            Ok(())
        }

        Commands::Register { name, email } => {
            let db = get_db()?;
            db.upsert_user(name, email)?;
            let user = db
                .get_user_by_email(email)?
                .context("registration did not persist")?;
            println!("User #{} {} <{}>", user.id, user.name, user.email);
            Ok(())
        }

        Commands::Workspace { action } => {
            let db = get_db()?;
            let user = principal(&cli)?;
            match action {
                WorkspaceCommands::Create { name, description } => {
                    let ws = workspace::create_workspace(&db, user, name, description.as_deref())?;
                    println!("Created workspace #{} \"{}\"", ws.id, ws.name);
                }
                WorkspaceCommands::List => {
                    for ws in workspace::my_workspaces(&db, user)? {
                        println!("#{}  {}", ws.id, ws.name);
                    }
                }
                WorkspaceCommands::Show { id } => {
                    let ws = workspace::get_workspace(&db, user, *id)?;
                    println!("{}", serde_json::to_string_pretty(&ws)?);
                }
                WorkspaceCommands::Update {
                    id,
                    name,
                    description,
                } => {
                    workspace::update_workspace(
                        &db,
                        user,
                        *id,
                        name.as_deref(),
                        description.as_deref(),
                    )?;
                    println!("Updated workspace #{}", id);
                }
                WorkspaceCommands::Delete { id } => {
                    workspace::delete_workspace(&db, user, *id)?;
                    println!("Deleted workspace #{}", id);
                }
                WorkspaceCommands::AddMember { id, user_id, role } => {
                    let role = parse_workspace_role(role)?;
                    workspace::add_member(&db, user, *id, *user_id, role)?;
                    println!("Added user #{} to workspace #{}", user_id, id);
                }
                WorkspaceCommands::RemoveMember { id, user_id } => {
                    workspace::remove_member(&db, user, *id, *user_id)?;
                    println!("Removed user #{} from workspace #{}", user_id, id);
                }
                WorkspaceCommands::SetRole { id, user_id, role } => {
                    let role = parse_workspace_role(role)?;
                    workspace::set_member_role(&db, user, *id, *user_id, role)?;
                    println!("Updated role of user #{} in workspace #{}", user_id, id);
                }
                WorkspaceCommands::Members { id } => {
                    for member in workspace::list_members(&db, user, *id)? {
                        println!("#{}  {}", member.user_id, member.role.as_str());
                    }
                }
            }
            Ok(())
        }

        Commands::Project { action } => {
            let db = get_db()?;
            let user = principal(&cli)?;
            match action {
                ProjectCommands::Create {
                    workspace_id,
                    name,
                    description,
                } => {
                    let p = project::create_project(
                        &db,
                        user,
                        *workspace_id,
                        name,
                        description.as_deref(),
                    )?;
                    println!("Created project #{} \"{}\"", p.id, p.name);
                }
                ProjectCommands::List { workspace_id } => {
                    for p in project::list_projects(&db, user, *workspace_id)? {
                        println!("#{}  {}", p.id, p.name);
                    }
                }
                ProjectCommands::Show { id } => {
                    let p = project::get_project(&db, user, *id)?;
                    println!("{}", serde_json::to_string_pretty(&p)?);
                }
                ProjectCommands::Update {
                    id,
                    name,
                    description,
                } => {
                    project::update_project(&db, user, *id, name.as_deref(), description.as_deref())?;
                    println!("Updated project #{}", id);
                }
                ProjectCommands::Delete { id } => {
                    project::delete_project(&db, user, *id)?;
                    println!("Deleted project #{}", id);
                }
                ProjectCommands::AddMember { id, user_id, role } => {
                    let role = parse_project_role(role)?;
                    project::add_member(&db, user, *id, *user_id, role)?;
                    println!("Added user #{} to project #{}", user_id, id);
                }
                ProjectCommands::SetRole { id, user_id, role } => {
                    let role = parse_project_role(role)?;
                    project::set_member_role(&db, user, *id, *user_id, role)?;
                    println!("Updated role of user #{} in project #{}", user_id, id);
                }
                ProjectCommands::RemoveMember { id, user_id } => {
                    project::remove_member(&db, user, *id, *user_id)?;
                    println!("Removed user #{} from project #{}", user_id, id);
                }
                ProjectCommands::Members { id } => {
                    for member in project::list_members(&db, user, *id)? {
                        println!("#{}  {}", member.user_id, member.role.as_str());
                    }
                }
            }
            Ok(())
        }

        Commands::Sprint { action } => {
            let db = get_db()?;
            let user = principal(&cli)?;
            match action {
                SprintCommands::Add {
                    project_id,
                    name,
                    start,
                    end,
                } => {
                    let start = task::parse_date(start)
                        .with_context(|| format!("Invalid start date '{}'", start))?;
                    let end = task::parse_date(end)
                        .with_context(|| format!("Invalid end date '{}'", end))?;
                    let sprint = project::add_sprint(&db, user, *project_id, name, start, end)?;
                    println!("Created sprint #{} \"{}\"", sprint.id, sprint.name);
                }
                SprintCommands::List { project_id } => {
                    for sprint in project::list_sprints(&db, user, *project_id)? {
                        println!(
                            "#{}  {}  {} .. {}",
                            sprint.id,
                            sprint.name,
                            sprint.start_date.date_naive(),
                            sprint.end_date.date_naive()
                        );
                    }
                }
                SprintCommands::Remove { project_id, name } => {
                    project::remove_sprint(&db, user, *project_id, name)?;
                    println!("Removed sprint \"{}\" from project #{}", name, project_id);
                }
            }
            Ok(())
        }

        Commands::Task { action } => {
            let db = get_db()?;
            let user = principal(&cli)?;
            match action {
                TaskCommands::Create {
                    project_id,
                    title,
                    description,
                    priority,
                    status,
                    due,
                    assignee,
                    sprint,
                } => {
                    let priority = Priority::parse(priority).ok_or_else(|| {
                        anyhow::anyhow!(
                            "Invalid priority '{}'. Must be one of: low, medium, high",
                            priority
                        )
                    })?;
                    let status = TaskStatus::parse(status).ok_or_else(|| {
                        anyhow::anyhow!(
                            "Invalid status '{}'. Must be one of: pending, in-progress, completed",
                            status
                        )
                    })?;
                    let due_date = match due {
                        Some(raw) => Some(
                            task::parse_date(raw)
                                .with_context(|| format!("Invalid due date '{}'", raw))?,
                        ),
                        None => None,
                    };
                    let created = task::create_task(
                        &db,
                        user,
                        CreateTask {
                            project_id: *project_id,
                            title: title.clone(),
                            description: description.clone(),
                            priority,
                            status,
                            due_date,
                            assignee_id: *assignee,
                            sprint_id: *sprint,
                        },
                    )?;
                    println!("Created task #{} \"{}\"", created.id, created.title);
                }
                TaskCommands::List { project_id } => {
                    print_tasks(&task::tasks_by_project(&db, *project_id)?);
                }
                TaskCommands::Assigned => {
                    print_tasks(&task::tasks_by_assignee(&db, user)?);
                }
                TaskCommands::BySprint { sprint_id } => {
                    print_tasks(&task::tasks_by_sprint(&db, *sprint_id)?);
                }
                TaskCommands::Show { id } => {
                    let detail = task::task_detail(&db, *id)?;
                    println!("{}", serde_json::to_string_pretty(&detail)?);
                }
                TaskCommands::Update {
                    id,
                    title,
                    description,
                    priority,
                    status,
                    due,
                    assignee,
                    sprint,
                } => {
                    let patch = TaskPatch {
                        title: title.clone(),
                        description: description.clone(),
                        priority: priority.clone(),
                        status: status.clone(),
                        due_date: due.clone(),
                        assignee_id: assignee.clone(),
                        sprint_id: sprint.clone(),
                    };
                    if patch.is_empty() {
                        bail!("Nothing to update. Pass at least one field option.");
                    }
                    let outcome = task::update_task(&db, user, *id, &patch)?;
                    if outcome.changed.is_empty() {
                        println!("Task #{} unchanged", id);
                    } else {
                        println!("Updated task #{}: {}", id, outcome.changed.join(", "));
                    }
                }
                TaskCommands::Comment { id, text } => {
                    let comment = task::add_comment(&db, user, *id, text)?;
                    println!("Comment #{} on task #{}", comment.id, id);
                }
                TaskCommands::Delete { id } => {
                    task::delete_task(&db, user, *id)?;
                    println!("Deleted task #{}", id);
                }
            }
            Ok(())
        }

        Commands::Notification { action } => {
            let db = get_db()?;
            let user = principal(&cli)?;
            match action {
                NotificationCommands::List => {
                    for n in notify::list_for_user(&db, user)? {
                        let marker = if n.is_read { " " } else { "*" };
                        println!("{}#{}  [{}]  {}", marker, n.id, n.kind.as_str(), n.message);
                    }
                }
                NotificationCommands::Read { id } => {
                    notify::mark_read(&db, user, *id)?;
                    println!("Marked notification #{} read", id);
                }
                NotificationCommands::ReadAll => {
                    let count = notify::mark_all_read(&db, user)?;
                    println!("Marked {} notification(s) read", count);
                }
            }
            Ok(())
        }

        Commands::Sweep { action } => match action {
            SweepCommands::Run => {
                let db = get_db()?;
                let emitted = sweep::run_once(&db, chrono::Utc::now())?;
                println!("Sweep emitted {} notification(s)", emitted);
                Ok(())
            }
            SweepCommands::Watch { interval } => {
                let path = db_path()?;
                let term = Arc::new(AtomicBool::new(false));
                signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
                signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

                let mut sweeper =
                    sweep::DueSoonSweeper::start(path, Duration::from_secs(*interval));
                println!("Sweeping every {}s. Ctrl-C to stop.", interval);
                while !term.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(200));
                }
                sweeper.stop();
                println!("Stopped.");
                Ok(())
            }
        },
    }
}

fn print_tasks(tasks: &[stride::models::Task]) {
    for t in tasks {
        let due = t
            .due_date
            .map(|d| d.date_naive().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{}  [{}/{}]  due {}  {}",
            t.id,
            t.status.as_str(),
            t.priority.as_str(),
            due,
            t.title
        );
    }
}
