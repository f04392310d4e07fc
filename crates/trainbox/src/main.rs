//! Trainbox CLI.
//!
//! Operator entry point for a multi-tenant GPU training host: validates the
//! configuration against the hardware, manages the user allocation registry,
//! generates the compose manifest and drives runtime, storage, backups and
//! alerting.

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::LevelFilter;
use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use trainbox::alert::{Alerter, Delivery, Severity};
use trainbox::backup::ResticRunner;
use trainbox::compose;
use trainbox::config::HostConfig;
use trainbox::probe;
use trainbox::registry::{Database, UserRecord, UserRegistry};
use trainbox::runtime::ContainerRuntime;
use trainbox::storage::StorageOps;
use trainbox::system;
use trainbox::validate;

const APP_NAME: &str = "trainbox";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: Command) -> Result<()> {
    match cmd {
        Command::Validate => handle_validate(&ctx).await,
        Command::Generate(cmd) => handle_generate(&ctx, cmd).await,
        Command::Users { command } => handle_users(&ctx, command).await,
        Command::Up(cmd) => handle_up(&ctx, cmd).await,
        Command::Down => handle_down(&ctx).await,
        Command::Status => handle_status(&ctx).await,
        Command::Storage { command } => handle_storage(&ctx, command).await,
        Command::Backup { command } => handle_backup(&ctx, command).await,
        Command::Alert { command } => handle_alert(&ctx, command).await,
        Command::Init(_)
        | Command::Config { .. }
        | Command::System { .. }
        | Command::Completions { .. } => {
            unreachable!("handled synchronously")
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::System { command } => handle_system(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
        other => async_main(ctx, other),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Trainbox - provisioning and operations for a multi-tenant GPU training host.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", global = true)]
    assume_yes: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the default configuration file
    Init(InitCommand),
    /// Inspect or reset the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Validate configuration and host readiness
    Validate,
    /// Generate the compose manifest and secrets env file
    Generate(GenerateCommand),
    /// Manage workspace users
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Validate, regenerate and start the stack
    Up(UpCommand),
    /// Stop the stack
    Down,
    /// Show the state of the stack's services
    Status,
    /// Storage pool operations
    Storage {
        #[command(subcommand)]
        command: StorageCommand,
    },
    /// Backup operations
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Host integration (systemd units)
    System {
        #[command(subcommand)]
        command: SystemCommand,
    },
    /// Operator alerts
    Alert {
        #[command(subcommand)]
        command: AlertCommand,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone, Args)]
struct GenerateCommand {
    /// Write the manifest here instead of the configured path
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Skip the runtime's own manifest verification
    #[arg(long = "skip-verify")]
    skip_verify: bool,
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    /// Register a user, allocate UID and ports, create their home
    Add(UsersAddCommand),
    /// Remove a user's registration
    Remove(UsersRemoveCommand),
    /// List registered users
    List,
    /// Deactivate a user without touching their allocation
    Deactivate { username: String },
    /// Reactivate a deactivated user
    Activate { username: String },
}

#[derive(Debug, Clone, Args)]
struct UsersAddCommand {
    /// Username (lowercase; becomes the Linux user and <user>.<domain>)
    username: String,
    /// Register only; do not create the home subvolume
    #[arg(long = "no-home")]
    no_home: bool,
    /// Env var holding the user's initial password (default: <USER>_PASSWORD)
    #[arg(long = "password-env", value_name = "VAR")]
    password_env: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct UsersRemoveCommand {
    username: String,
    /// Also delete the home subvolume and all data in it
    #[arg(long)]
    purge: bool,
}

#[derive(Debug, Clone, Args)]
struct UpCommand {
    /// Pull images before starting
    #[arg(long)]
    pull: bool,
    /// Skip the validation gate (not recommended)
    #[arg(long = "skip-validation")]
    skip_validation: bool,
}

#[derive(Debug, Subcommand)]
enum StorageCommand {
    /// Pool capacity and device report
    Status,
    /// Start a scrub, or report progress with --status
    Scrub(ScrubCommand),
    /// Create the homes/datasets/infra layout under the mount point
    Layout,
}

#[derive(Debug, Clone, Args)]
struct ScrubCommand {
    /// Report scrub progress instead of starting one
    #[arg(long)]
    status: bool,
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    /// Run a backup now, then apply the retention policy
    Run,
    /// List snapshots in the repository
    Snapshots,
    /// Verify repository integrity
    Check,
}

#[derive(Debug, Subcommand)]
enum SystemCommand {
    /// Render and install the systemd units
    Install(SystemInstallCommand),
    /// Print the rendered units without writing anything
    Render,
}

#[derive(Debug, Clone, Args)]
struct SystemInstallCommand {
    /// Target directory for unit files
    #[arg(long, value_name = "DIR", default_value = "/etc/systemd/system")]
    unit_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum AlertCommand {
    /// Send an alert through the configured channels
    Send(AlertSendCommand),
}

#[derive(Debug, Clone, Args)]
struct AlertSendCommand {
    /// Message text
    message: String,
    /// Severity: info, warning or critical
    #[arg(long, default_value = "info")]
    severity: Severity,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: HostConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let mut paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&mut paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("trainbox={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {} and state dir {}",
                self.paths.data_dir.display(),
                self.paths.state_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        fs::create_dir_all(&self.paths.state_dir).with_context(|| {
            format!(
                "creating state directory {}",
                self.paths.state_dir.display()
            )
        })?;
        Ok(())
    }

    fn compose_path(&self) -> Result<PathBuf> {
        expand_str_path(&self.config.runtime.compose_file)
    }

    fn env_path(&self) -> Result<PathBuf> {
        expand_str_path(&self.config.runtime.env_file)
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    data_dir: PathBuf,
    state_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        let data_dir = default_data_dir()?;
        let state_dir = default_state_dir()?;

        Ok(Self {
            config_file,
            data_dir,
            state_dir,
        })
    }

    fn apply_overrides(mut self, cfg: &HostConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        if let Some(ref state_override) = cfg.paths.state_dir {
            self.state_dir = expand_str_path(state_override)?;
        }
        Ok(self)
    }

    fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.db")
    }
}

// ===== Sync handlers =====

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)?;
    println!("wrote {}", ctx.paths.config_file.display());
    println!("edit host.domain, storage.raid_level and the secrets section, then run `trainbox validate`");
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_system(ctx: &RuntimeContext, command: SystemCommand) -> Result<()> {
    let units = system::render_units(&ctx.config);
    match command {
        SystemCommand::Render => {
            for unit in &units {
                println!("# ===== {} =====", unit.name);
                println!("{}", unit.contents);
            }
            Ok(())
        }
        SystemCommand::Install(cmd) => {
            let written = system::install_units(&cmd.unit_dir, &units, ctx.common.dry_run)?;
            if ctx.common.dry_run {
                return Ok(());
            }
            println!(
                "installed {} unit files to {}",
                written.len(),
                cmd.unit_dir.display()
            );
            println!("next steps:");
            println!("  systemctl daemon-reload");
            println!("  systemctl enable --now trainbox-backup.timer trainbox-scrub.timer");
            if system::rclone_remote(&ctx.config.backup.repository).is_some() {
                println!("  systemctl enable --now trainbox-rclone-mount.service");
            }
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

// ===== Async handlers =====

async fn open_registry(ctx: &RuntimeContext) -> Result<UserRegistry> {
    let db = Database::new(&ctx.paths.registry_path()).await?;
    Ok(UserRegistry::new(db.pool().clone()))
}

fn busy_ports(users: &[UserRecord]) -> Vec<u16> {
    users
        .iter()
        .flat_map(|r| r.ports())
        .filter_map(|(_, p)| u16::try_from(p).ok())
        .filter(|p| !probe::is_port_free(*p))
        .collect()
}

async fn handle_validate(ctx: &RuntimeContext) -> Result<()> {
    let registry = open_registry(ctx).await?;
    let users = registry.list().await?;
    let inventory = probe::gather().await;
    let busy = busy_ports(&users);

    let report = validate::run(&ctx.config, &users, &inventory, &busy);
    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }

    if report.passed() {
        Ok(())
    } else {
        Err(anyhow!(
            "validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

/// Validation gate shared by every operation that changes the host. Errors
/// block; warnings are logged and waved through.
async fn preflight(ctx: &RuntimeContext, registry: &UserRegistry) -> Result<Vec<UserRecord>> {
    let users = registry.list().await?;
    let inventory = probe::gather().await;
    let busy = busy_ports(&users);
    let report = validate::run(&ctx.config, &users, &inventory, &busy);

    if !report.passed() {
        eprintln!("{}", report.render());
        return Err(anyhow!(
            "validation failed with {} error(s); fix the configuration and retry",
            report.errors.len()
        ));
    }
    for warning in &report.warnings {
        warn!("{warning}");
    }
    Ok(users)
}

/// Write the manifest and env file. Returns the manifest path.
async fn write_stack_files(
    ctx: &RuntimeContext,
    users: &[UserRecord],
    output: Option<&Path>,
) -> Result<PathBuf> {
    let active: Vec<UserRecord> = users.iter().filter(|u| u.is_active).cloned().collect();
    let manifest = compose::build_manifest(&ctx.config, &active);
    let rendered = compose::render(&manifest)?;

    let compose_path = match output {
        Some(path) => path.to_path_buf(),
        None => ctx.compose_path()?,
    };
    let env_path = ctx.env_path()?;

    if ctx.common.dry_run {
        info!("dry-run: would write {}", compose_path.display());
        info!("dry-run: would ensure {}", env_path.display());
        return Ok(compose_path);
    }

    compose::write_manifest(&compose_path, &rendered)?;
    println!(
        "wrote {} ({} services, {} workspaces)",
        compose_path.display(),
        manifest.services.len(),
        active.len()
    );

    if compose::ensure_env_file(&env_path, &ctx.config, &active)? {
        println!("wrote {} (new secrets generated)", env_path.display());
    } else {
        debug!("{} already exists, left untouched", env_path.display());
    }

    Ok(compose_path)
}

async fn verify_manifest(ctx: &RuntimeContext, compose_path: &Path) -> Result<()> {
    match ContainerRuntime::from_config(&ctx.config.runtime) {
        Ok(runtime) => runtime
            .compose_check(compose_path)
            .await
            .context("compose manifest failed runtime verification"),
        Err(err) => {
            warn!("skipping manifest verification: {err}");
            Ok(())
        }
    }
}

async fn handle_generate(ctx: &RuntimeContext, cmd: GenerateCommand) -> Result<()> {
    let registry = open_registry(ctx).await?;
    let users = preflight(ctx, &registry).await?;
    let compose_path = write_stack_files(ctx, &users, cmd.output.as_deref()).await?;

    if !cmd.skip_verify && !ctx.common.dry_run {
        verify_manifest(ctx, &compose_path).await?;
    }
    Ok(())
}

async fn handle_users(ctx: &RuntimeContext, command: UsersCommand) -> Result<()> {
    match command {
        UsersCommand::Add(cmd) => handle_users_add(ctx, cmd).await,
        UsersCommand::Remove(cmd) => handle_users_remove(ctx, cmd).await,
        UsersCommand::List => handle_users_list(ctx).await,
        UsersCommand::Deactivate { username } => {
            let registry = open_registry(ctx).await?;
            if !registry.set_active(&username, false).await? {
                return Err(anyhow!("user '{username}' is not registered"));
            }
            println!("deactivated {username}; regenerate the manifest to retire the workspace");
            Ok(())
        }
        UsersCommand::Activate { username } => {
            let registry = open_registry(ctx).await?;
            if !registry.set_active(&username, true).await? {
                return Err(anyhow!("user '{username}' is not registered"));
            }
            println!("activated {username}; regenerate the manifest to start the workspace");
            Ok(())
        }
    }
}

async fn handle_users_add(ctx: &RuntimeContext, cmd: UsersAddCommand) -> Result<()> {
    let registry = open_registry(ctx).await?;
    preflight(ctx, &registry).await?;

    if ctx.common.dry_run {
        info!("dry-run: would register user '{}'", cmd.username);
        return Ok(());
    }

    let record = registry
        .create(&cmd.username, cmd.password_env.as_deref(), &ctx.config)
        .await?;

    if !cmd.no_home {
        let storage = StorageOps::new(&ctx.config, ctx.common.dry_run);
        if storage.pool_available() {
            if let Err(err) = storage.create_home(&record.username, record.uid as u32).await {
                // Roll the registration back so the operator can re-run the
                // whole thing after fixing the pool. The slot stays burned.
                registry.remove(&record.username).await?;
                return Err(err.context("creating home subvolume; registration rolled back"));
            }
        } else {
            warn!(
                "storage pool {} is not mounted; skipping home creation",
                ctx.config.host.mount_point
            );
        }
    }

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("registered {}", record.username);
        println!("  slot   {}", record.slot);
        println!("  uid    {}", record.uid);
        println!("  ssh    {}", record.ssh_port);
        println!("  vnc    {}", record.vnc_port);
        println!("  rdp    {}", record.rdp_port);
        println!("  novnc  {}", record.novnc_port);
        println!(
            "  web    https://{}.{}",
            record.username, ctx.config.host.domain
        );
        println!("run `trainbox generate && trainbox up` to deploy the workspace");
    }
    Ok(())
}

async fn handle_users_remove(ctx: &RuntimeContext, cmd: UsersRemoveCommand) -> Result<()> {
    let registry = open_registry(ctx).await?;

    let prompt = if cmd.purge {
        format!(
            "remove user '{}' AND delete their home subvolume?",
            cmd.username
        )
    } else {
        format!("remove user '{}'?", cmd.username)
    };
    if !ctx.common.assume_yes && !ctx.common.dry_run && !confirm(&prompt)? {
        info!("aborted");
        return Ok(());
    }

    if ctx.common.dry_run {
        info!("dry-run: would remove user '{}'", cmd.username);
        return Ok(());
    }

    if !registry.remove(&cmd.username).await? {
        return Err(anyhow!("user '{}' is not registered", cmd.username));
    }

    if cmd.purge {
        let storage = StorageOps::new(&ctx.config, ctx.common.dry_run);
        if storage.pool_available() {
            storage.delete_home(&cmd.username).await?;
        } else {
            warn!(
                "storage pool {} is not mounted; home subvolume left in place",
                ctx.config.host.mount_point
            );
        }
    }

    println!(
        "removed {}; regenerate the manifest to retire the container",
        cmd.username
    );
    Ok(())
}

async fn handle_users_list(ctx: &RuntimeContext) -> Result<()> {
    let registry = open_registry(ctx).await?;
    let users = registry.list().await?;

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("no users registered");
        return Ok(());
    }

    println!(
        "{:<20} {:>4} {:>6} {:>6} {:>6} {:>6} {:>6}  {:<8} {}",
        "USER", "SLOT", "UID", "SSH", "VNC", "RDP", "NOVNC", "ACTIVE", "CREATED"
    );
    for user in &users {
        println!(
            "{:<20} {:>4} {:>6} {:>6} {:>6} {:>6} {:>6}  {:<8} {}",
            user.username,
            user.slot,
            user.uid,
            user.ssh_port,
            user.vnc_port,
            user.rdp_port,
            user.novnc_port,
            if user.is_active { "yes" } else { "no" },
            user.created_at
        );
    }
    println!("Total: {} users", users.len());
    Ok(())
}

async fn handle_up(ctx: &RuntimeContext, cmd: UpCommand) -> Result<()> {
    let registry = open_registry(ctx).await?;
    let users = if cmd.skip_validation {
        warn!("skipping validation gate");
        registry.list().await?
    } else {
        preflight(ctx, &registry).await?
    };

    let compose_path = write_stack_files(ctx, &users, None).await?;
    if ctx.common.dry_run {
        info!("dry-run: would start the stack");
        return Ok(());
    }

    let runtime = ContainerRuntime::from_config(&ctx.config.runtime)?;
    runtime.compose_check(&compose_path).await?;
    runtime.compose_up(&compose_path, cmd.pull).await?;
    println!("stack is up");
    Ok(())
}

async fn handle_down(ctx: &RuntimeContext) -> Result<()> {
    if ctx.common.dry_run {
        info!("dry-run: would stop the stack");
        return Ok(());
    }
    let runtime = ContainerRuntime::from_config(&ctx.config.runtime)?;
    runtime.compose_down(&ctx.compose_path()?).await?;
    println!("stack is down");
    Ok(())
}

async fn handle_status(ctx: &RuntimeContext) -> Result<()> {
    let runtime = ContainerRuntime::from_config(&ctx.config.runtime)?;
    let output = runtime.compose_ps(&ctx.compose_path()?).await?;
    println!("{output}");
    Ok(())
}

async fn handle_storage(ctx: &RuntimeContext, command: StorageCommand) -> Result<()> {
    let storage = StorageOps::new(&ctx.config, ctx.common.dry_run);
    match command {
        StorageCommand::Status => handle_storage_status(ctx, &storage).await,
        StorageCommand::Scrub(cmd) => {
            if cmd.status {
                println!("{}", storage.scrub_status().await?);
            } else {
                storage.scrub_start().await?;
                println!("scrub started; check progress with `trainbox storage scrub --status`");
            }
            Ok(())
        }
        StorageCommand::Layout => {
            storage.ensure_layout().await?;
            println!("storage layout ready under {}", ctx.config.host.mount_point);
            Ok(())
        }
    }
}

async fn handle_storage_status(ctx: &RuntimeContext, storage: &StorageOps) -> Result<()> {
    let inventory = probe::gather().await;

    match &inventory.disks {
        Some(disks) if !disks.is_empty() => {
            println!("{:<12} {:>10}  {}", "DEVICE", "SIZE", "TYPE");
            for disk in disks {
                println!(
                    "{:<12} {:>9.1}G  {}",
                    disk.name,
                    disk.size_gib(),
                    if disk.rotational { "hdd" } else { "ssd" }
                );
            }
            if let Some(hdds) = inventory.hdds() {
                let usable = probe::estimate_usable_bytes(ctx.config.storage.raid_level, &hdds);
                println!(
                    "estimated usable at {}: {:.1}G over {} HDDs",
                    ctx.config.storage.raid_level,
                    usable as f64 / (1024.0 * 1024.0 * 1024.0),
                    hdds.len()
                );
            }
        }
        _ => println!("no block devices visible"),
    }

    if storage.pool_available() {
        println!();
        println!("{}", storage.usage().await?);
    } else {
        println!("pool {} is not mounted", ctx.config.host.mount_point);
    }
    Ok(())
}

async fn handle_backup(ctx: &RuntimeContext, command: BackupCommand) -> Result<()> {
    let runner = ResticRunner::from_config(&ctx.config, ctx.common.dry_run)?;
    match command {
        BackupCommand::Run => {
            if let Err(err) = runner.run_backup().await {
                let alerter = Alerter::new(ctx.config.alerts.clone());
                alerter
                    .send(Severity::Critical, &format!("backup failed: {err:#}"))
                    .await;
                return Err(err);
            }
            println!("backup complete");
            Ok(())
        }
        BackupCommand::Snapshots => {
            let snapshots = runner.snapshots().await?;
            if ctx.common.json {
                println!("{}", serde_json::to_string_pretty(&snapshot_rows(&snapshots))?);
                return Ok(());
            }
            if snapshots.is_empty() {
                println!("no snapshots");
                return Ok(());
            }
            println!("{:<10} {:<22} {}", "ID", "TIME", "PATHS");
            for snap in &snapshots {
                println!(
                    "{:<10} {:<22} {}",
                    snap.short_id,
                    snap.time.format("%Y-%m-%d %H:%M:%S"),
                    snap.paths.join(", ")
                );
            }
            println!("Total: {} snapshots", snapshots.len());
            Ok(())
        }
        BackupCommand::Check => {
            runner.check().await?;
            println!("repository check passed");
            Ok(())
        }
    }
}

fn snapshot_rows(snapshots: &[trainbox::backup::Snapshot]) -> Vec<serde_json::Value> {
    snapshots
        .iter()
        .map(|s| {
            serde_json::json!({
                "id": s.id,
                "short_id": s.short_id,
                "time": s.time.to_rfc3339(),
                "paths": s.paths,
                "tags": s.tags,
            })
        })
        .collect()
}

async fn handle_alert(ctx: &RuntimeContext, command: AlertCommand) -> Result<()> {
    match command {
        AlertCommand::Send(cmd) => {
            let alerter = Alerter::new(ctx.config.alerts.clone());
            match alerter.send(cmd.severity, &cmd.message).await {
                Delivery::Delivered => println!("alert delivered"),
                Delivery::LoggedOnly => println!("alert logged (Telegram not configured)"),
                Delivery::PushFailed => println!("alert logged, but Telegram delivery failed"),
            }
            Ok(())
        }
    }
}

// ===== Config plumbing =====

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<HostConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let mut config: HostConfig = built.try_deserialize()?;

    if let Some(ref file) = config.logging.file {
        let expanded = expand_str_path(file)?;
        config.logging.file = Some(expanded.display().to_string());
    }

    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = HostConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path)?;
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> Result<String> {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push('\n');
    Ok(buffer)
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn default_state_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::state_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine state directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
