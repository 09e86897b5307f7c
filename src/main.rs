use std::collections::HashSet;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use agenda_notify::config::{AppConfig, default_config_path};
use agenda_notify::core::filter::{FilterState, apply_filters};
use agenda_notify::core::todo::{Priority, Todo, TodoState};
use agenda_notify::notify::scheduler::load_saved;
use agenda_notify::notify::{
    DriverHandle, Lifecycle, LogPresenter, NotificationSync, PreFireVerifier, SyncDriver,
    SyncOutcome, SyncStateStore, SyncTrigger, TimerScheduler,
};
use agenda_notify::sync::api::AgendaSpan;
use agenda_notify::sync::{ApiClient, SecretStore, ServerRegistry, default_store};
use agenda_notify::daemon::{self, DaemonGuard};
use agenda_notify::{Result, logging};

#[derive(Debug, Parser)]
#[command(
    name = "agenda-notify",
    about = "Reminders and agenda from an org task server",
    version
)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Save a server and make it active. Reads the password from stdin.
    Login(LoginArgs),

    /// Manage saved servers.
    #[command(subcommand)]
    Servers(ServersCommand),

    /// Show or set how many days ahead reminders are scheduled.
    Horizon {
        /// New horizon in days (1 to 90).
        days: Option<f64>,
    },

    /// Sync reminders with the active server once. Refused while `run` is
    /// active; send the daemon SIGUSR1 instead.
    Sync,

    /// Show sync state for the active server.
    Status,

    /// Print the agenda.
    Agenda(AgendaArgs),

    /// List todos, optionally filtered.
    Todos(TodosArgs),

    /// Keep reminders in sync and fire them until stopped.
    Run,
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    nickname: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ServersCommand {
    List,
    /// Make a saved server active.
    Use { id: Uuid },
    /// Forget a saved server and its password.
    Remove { id: Uuid },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SpanArg {
    Day,
    Week,
}

impl From<SpanArg> for AgendaSpan {
    fn from(span: SpanArg) -> Self {
        match span {
            SpanArg::Day => AgendaSpan::Day,
            SpanArg::Week => AgendaSpan::Week,
        }
    }
}

#[derive(Debug, Args)]
struct AgendaArgs {
    #[arg(long, value_enum, default_value_t = SpanArg::Day)]
    span: SpanArg,
    /// Agenda date (YYYY-MM-DD). Defaults to today on the server.
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
struct TodosArgs {
    /// Keep todos carrying any of these tags.
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Drop todos carrying any of these tags.
    #[arg(long = "exclude-tag")]
    exclude_tags: Vec<String>,
    /// State keywords, e.g. TODO or NEXT.
    #[arg(long = "state")]
    states: Vec<String>,
    /// Priorities A, B or C.
    #[arg(long = "priority")]
    priorities: Vec<String>,
    /// Scheduled or deadline on or after this date.
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Scheduled or deadline on or before this date.
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long = "file")]
    files: Vec<String>,
    #[arg(long = "category")]
    categories: Vec<String>,
}

impl TodosArgs {
    fn to_filter(&self) -> FilterState {
        let date_range = match (self.from, self.to) {
            (None, None) => None,
            (from, to) => Some((
                from.unwrap_or(NaiveDate::MIN),
                to.unwrap_or(NaiveDate::MAX),
            )),
        };
        FilterState {
            tags_include: self.tags.iter().cloned().collect(),
            tags_exclude: self.exclude_tags.iter().cloned().collect(),
            states: self
                .states
                .iter()
                .map(|s| TodoState::from_keyword(&s.to_uppercase()))
                .collect(),
            priorities: self
                .priorities
                .iter()
                .filter_map(|p| Priority::from_org(&p.to_uppercase()))
                .collect::<HashSet<_>>(),
            date_range,
            files: self.files.iter().cloned().collect(),
            categories: self.categories.iter().cloned().collect(),
        }
    }
}

struct Context {
    config: AppConfig,
    store: Box<dyn SecretStore>,
}

impl Context {
    fn registry(&self) -> Result<ServerRegistry> {
        ServerRegistry::load(&self.config.servers_path())
    }

    async fn client(&self) -> Result<Arc<ApiClient>> {
        let mut registry = self.registry()?;
        registry.migrate_legacy_passwords(self.store.as_ref()).await?;
        Ok(Arc::new(registry.active_client(self.store.as_ref()).await?))
    }

    fn state(&self) -> Arc<SyncStateStore> {
        Arc::new(SyncStateStore::load(&self.config.sync_state_path()))
    }

    /// Engine over the persisted timer set, with pre-fire checks against `client`.
    async fn engine(&self, client: Arc<ApiClient>) -> Result<(Arc<NotificationSync>, Arc<TimerScheduler>)> {
        let state = self.state();
        let scheduler = Arc::new(TimerScheduler::persistent(
            Arc::new(LogPresenter),
            self.config.scheduled_path(),
        ));
        scheduler.set_gate(Arc::new(PreFireVerifier::new(client.clone(), state.clone())));
        scheduler.restore().await?;
        let engine = Arc::new(NotificationSync::new(client, scheduler.clone(), state));
        Ok((engine, scheduler))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = match AppConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    logging::init("agenda-notify", config.debug_logging || cli.verbose);

    if let Err(e) = config.ensure_dirs() {
        eprintln!("Failed to create {}: {}", config.data_directory.display(), e);
        return ExitCode::FAILURE;
    }

    let ctx = Context {
        store: Box::new(default_store(&config.secrets_path())),
        config,
    };

    match dispatch(cli.command, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, ctx: &Context) -> Result<()> {
    match command {
        Commands::Login(args) => handle_login(args, ctx).await,
        Commands::Servers(cmd) => handle_servers(cmd, ctx).await,
        Commands::Horizon { days } => handle_horizon(days, ctx),
        Commands::Sync => handle_sync(ctx).await,
        Commands::Status => handle_status(ctx),
        Commands::Agenda(args) => handle_agenda(args, ctx).await,
        Commands::Todos(args) => handle_todos(args, ctx).await,
        Commands::Run => handle_run(ctx).await,
    }
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn handle_login(args: LoginArgs, ctx: &Context) -> Result<()> {
    let password = read_password()?;
    let url = agenda_notify::sync::servers::normalize_api_url(&args.url)?;

    let client = Arc::new(ApiClient::new(&url, args.username.trim(), &password)?);
    client.check_connection().await?;

    let mut registry = ctx.registry()?;
    let id = registry
        .add(&url, &args.username, args.nickname, &password, ctx.store.as_ref())
        .await?;
    println!("Logged in, server {} is now active", id);

    let (engine, _scheduler) = ctx.engine(client).await?;
    print_outcome(engine.sync(SyncTrigger::AuthSuccess).await?);
    Ok(())
}

async fn handle_servers(cmd: ServersCommand, ctx: &Context) -> Result<()> {
    let mut registry = ctx.registry()?;
    match cmd {
        ServersCommand::List => {
            if registry.list().is_empty() {
                println!("No saved servers. Use `agenda-notify login`.");
            }
            let active = registry.active().map(|s| s.id);
            for server in registry.list() {
                let marker = if Some(server.id) == active { "*" } else { " " };
                let password = if server.has_password { "" } else { " (no password)" };
                println!("{} {}  {}{}", marker, server.id, server.display_name(), password);
            }
        }
        ServersCommand::Use { id } => {
            registry.set_active(&id)?;
            println!("Active server: {}", id);
        }
        ServersCommand::Remove { id } => {
            let removed = registry.remove(&id, ctx.store.as_ref()).await?;
            println!("Removed {}", removed.display_name());
        }
    }
    Ok(())
}

fn handle_horizon(days: Option<f64>, ctx: &Context) -> Result<()> {
    let state = ctx.state();
    match days {
        Some(days) => {
            let horizon = state.set_horizon(days)?;
            println!("Horizon set to {} days; applies on next sync", horizon.days());
            if let Some(pid) = daemon::running(&ctx.config.daemon_path()) {
                println!("Restart the daemon (pid {}) to pick it up", pid);
            }
        }
        None => println!("{} days", state.horizon().days()),
    }
    Ok(())
}

async fn handle_sync(ctx: &Context) -> Result<()> {
    // The daemon owns the armed timers and their file
    daemon::ensure_not_running(&ctx.config.daemon_path())?;
    let client = ctx.client().await?;
    let (engine, _scheduler) = ctx.engine(client).await?;
    print_outcome(engine.sync(SyncTrigger::Manual).await?);
    Ok(())
}

fn print_outcome(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => {
            println!(
                "Synced: {} scheduled, {} cancelled, {} unchanged, {} dismissed",
                report.scheduled, report.cancelled, report.unchanged, report.dismissed
            );
            for e in &report.errors {
                println!("  warning: {}", e);
            }
        }
        SyncOutcome::Skipped => println!("A sync is already running"),
    }
}

fn handle_status(ctx: &Context) -> Result<()> {
    let registry = ctx.registry()?;
    match registry.active() {
        Some(server) => println!("Server:    {}", server.display_name()),
        None => println!("Server:    none"),
    }

    let state = ctx.state().snapshot();
    println!("Horizon:   {} days", state.horizon_days.days());
    match state.last_sync_at {
        Some(at) => println!("Last sync: {}", at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")),
        None => println!("Last sync: never"),
    }
    if let Some(err) = &state.last_error {
        println!("Error:     {}", err);
    }

    let pending = load_saved(&ctx.config.scheduled_path())?;
    println!("Pending:   {} reminders", pending.len());
    for info in pending.iter().take(10) {
        println!(
            "  {}  {} ({})",
            info.scheduled_time.with_timezone(&chrono::Local).format("%a %d %b %H:%M"),
            info.title,
            info.body
        );
    }
    Ok(())
}

fn print_todo(todo: &Todo) {
    let priority = todo.priority.map(|p| format!("{} ", p.as_org())).unwrap_or_default();
    let mut when = String::new();
    if let Some(s) = &todo.scheduled {
        when.push_str(&format!("  SCHEDULED: {}", s));
    }
    if let Some(d) = &todo.deadline {
        when.push_str(&format!("  DEADLINE: {}", d));
    }
    let tags = if todo.tags.is_empty() {
        String::new()
    } else {
        format!("  :{}:", todo.tags.join(":"))
    };
    println!("{:<9} {}{}{}{}", todo.state.as_keyword(), priority, todo.title, tags, when);
}

async fn handle_agenda(args: AgendaArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client().await?;
    let agenda = client.get_agenda(args.span.into(), args.date).await?;
    println!(
        "Agenda ({}{})",
        agenda.span.as_str(),
        agenda.date.as_deref().map(|d| format!(", {}", d)).unwrap_or_default()
    );
    if agenda.todos.is_empty() {
        println!("  nothing scheduled");
    }
    let mut todos = agenda.todos;
    todos.sort_by_key(|t| (t.scheduled_date(), t.scheduled_at()));
    for todo in &todos {
        print_todo(todo);
    }
    Ok(())
}

async fn handle_todos(args: TodosArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client().await?;
    let todos = client.get_all_todos().await?;
    let filters = args.to_filter();
    let shown = apply_filters(&todos, &filters);
    for todo in &shown {
        print_todo(todo);
    }
    println!("{} of {} todos", shown.len(), todos.len());
    Ok(())
}

async fn handle_run(ctx: &Context) -> Result<()> {
    let _daemon = DaemonGuard::claim(&ctx.config.daemon_path())?;
    let client = ctx.client().await?;
    let (engine, _scheduler) = ctx.engine(client).await?;

    let handle = SyncDriver::spawn(
        engine.clone(),
        ctx.config.sync_interval(),
        Lifecycle::Foreground,
    );
    if ctx.config.sync_on_start {
        handle.trigger(SyncTrigger::Startup);
    }
    log::info!(
        "Running against {} (horizon {})",
        ctx.registry()?.active().map(|s| s.display_name()).unwrap_or_default(),
        engine.horizon()
    );

    let result = wait_for_signals(&handle).await;
    handle.stop().await;
    result
}

#[cfg(unix)]
async fn wait_for_signals(handle: &DriverHandle) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut term = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = term.recv() => break,
            _ = usr1.recv() => {
                log::info!("SIGUSR1: manual sync");
                handle.trigger(SyncTrigger::Manual);
            }
            _ = usr2.recv() => {
                let next = match handle.lifecycle() {
                    Lifecycle::Foreground => Lifecycle::Background,
                    Lifecycle::Background => Lifecycle::Foreground,
                };
                log::info!("SIGUSR2: now {:?}", next);
                handle.set_lifecycle(next);
            }
        }
    }
    log::info!("Shutting down");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signals(_handle: &DriverHandle) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
