//! CLI argument parsing with clap derive

use std::io::{BufRead as _, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};

use odoo_launcher_lib::config::{load_config, LauncherConfig};
use odoo_launcher_lib::database::{DatabaseBootstrapper, PostgresBootstrapper};
use odoo_launcher_lib::instance::{CreateInstanceRequest, InstanceFactory};
use odoo_launcher_lib::paths::{Paths, HOME_ENV};
use odoo_launcher_lib::pipeline::{spawn_full_setup, InstallPipeline, SetupRequest};
use odoo_launcher_lib::process::{is_instance_alive, Launcher};
use odoo_launcher_lib::progress::{Reporter, SetupEvent, StopFlag};
use odoo_launcher_lib::registry::{Instance, InstanceStatus, RegistryStore};
use odoo_launcher_lib::runtime::{GitVenvProvisioner, RuntimeProvisioner};
use odoo_launcher_lib::upstream::available_versions;

/// Provision and run isolated, versioned Odoo instances
#[derive(Parser)]
#[command(
    name = "odoo-launcher",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Data directory (defaults to ~/.odoo_launcher)
    #[arg(long, global = true, env = HOME_ENV)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List Odoo versions available upstream
    Versions {
        /// Ignore the cached list
        #[arg(long)]
        refresh: bool,
    },

    /// List registered instances
    List,

    /// Start PostgreSQL, fetch Odoo and create an instance in one go
    Setup(SetupArgs),

    /// Create an instance (uses a managed PostgreSQL if it is running)
    Create(CreateArgs),

    /// Start an instance
    Start { name: String },

    /// Stop an instance
    Stop { name: String },

    /// Delete an instance and its files
    Delete { name: String },

    /// Show the end of an instance's Odoo log
    Log {
        name: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Control the launcher-managed PostgreSQL
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Args)]
pub struct SetupArgs {
    pub name: String,
    #[arg(id = "odoo_version", value_name = "VERSION")]
    pub version: String,

    /// Database port written to odoo.conf
    #[arg(long)]
    pub db_port: Option<u16>,

    /// Leave the managed PostgreSQL running afterwards (a cluster that was
    /// already running is always left alone)
    #[arg(long)]
    pub keep_db: bool,
}

#[derive(Args)]
pub struct CreateArgs {
    pub name: String,
    #[arg(id = "odoo_version", value_name = "VERSION")]
    pub version: String,

    /// Database port written to odoo.conf
    #[arg(long)]
    pub db_port: Option<u16>,

    /// HTTP port (allocated automatically when omitted)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Subcommand)]
pub enum DbCommand {
    /// Start (and if needed download/initialise) PostgreSQL
    Start,
    /// Stop the managed PostgreSQL
    Stop,
    /// Show whether the managed PostgreSQL is running
    Status,
}

/// Everything a command may need, wired from the data directory.
struct Context {
    paths: Paths,
    config: LauncherConfig,
    client: reqwest::Client,
    store: Arc<RegistryStore>,
    provisioner: Arc<dyn RuntimeProvisioner>,
    bootstrapper: Arc<PostgresBootstrapper>,
}

impl Context {
    fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let paths = match data_dir {
            Some(dir) => Paths::new(dir),
            None => Paths::from_env()?,
        };
        paths.ensure_data_dirs()?;
        let config = load_config(&paths).context("cannot load config.toml")?;
        let client = reqwest::Client::new();
        let store = Arc::new(RegistryStore::new(
            paths.registry_path(),
            config.ports.database_default,
        ));
        let provisioner: Arc<dyn RuntimeProvisioner> =
            Arc::new(GitVenvProvisioner::new(paths.clone(), &config));
        let bootstrapper = Arc::new(
            PostgresBootstrapper::new(paths.clone(), client.clone(), config.database.clone())
                .with_github_proxy(&config.github_proxy),
        );
        Ok(Self {
            paths,
            config,
            client,
            store,
            provisioner,
            bootstrapper,
        })
    }

    fn factory(&self) -> InstanceFactory {
        InstanceFactory::new(
            self.paths.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.provisioner),
            &self.config,
        )
    }

    fn launcher(&self) -> Launcher {
        Launcher::new(self.paths.clone(), Arc::clone(&self.store), &self.config)
    }
}

fn print_instance(instance: &Instance) {
    let status = match instance.status {
        InstanceStatus::Running if !is_instance_alive(instance) => {
            "running (exited)".to_string()
        }
        status => status.to_string(),
    };
    println!(
        "{:<20} {:<8} {:>6} {:>6}  {}",
        instance.name, instance.version, instance.application_port, instance.database_port, status
    );
}

fn print_event(event: &SetupEvent) {
    match event {
        SetupEvent::Progress { percent, message } => println!("[{:>3}%] {}", percent, message),
        SetupEvent::Log { line } => println!("       {}", line),
        SetupEvent::Completed => println!("Setup complete"),
        SetupEvent::Failed { error } => eprintln!("Setup failed: {}", error),
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let ctx = Context::new(self.data_dir)?;
        match self.command {
            Command::Versions { refresh } => {
                for version in available_versions(&ctx.client, &ctx.paths, &ctx.config, refresh).await {
                    println!("{}", version);
                }
                Ok(())
            }
            Command::List => {
                let instances = ctx.factory().list_instances()?;
                if instances.is_empty() {
                    println!("No instances yet. Create one with `odoo-launcher setup <name> <version>`.");
                    return Ok(());
                }
                println!("{:<20} {:<8} {:>6} {:>6}  STATUS", "NAME", "VERSION", "HTTP", "DB");
                instances.iter().for_each(print_instance);
                Ok(())
            }
            Command::Setup(args) => run_setup(&ctx, args).await,
            Command::Create(args) => {
                let engine = ctx.bootstrapper.attach().await;
                let request = CreateInstanceRequest {
                    name: args.name,
                    version: args.version,
                    database_port: args.db_port,
                    application_port: args.port,
                };
                let reporter = Reporter::new(Arc::new(PrintSink));
                let instance = ctx
                    .factory()
                    .create_instance(request, engine.as_ref(), &reporter)
                    .await?;
                print_instance(&instance);
                Ok(())
            }
            Command::Start { name } => {
                let instance = ctx.launcher().start(&name)?;
                println!(
                    "Instance {} running on http://localhost:{} (pid {})",
                    instance.name,
                    instance.application_port,
                    instance.pid.unwrap_or_default()
                );
                Ok(())
            }
            Command::Stop { name } => {
                ctx.launcher().stop(&name).await?;
                println!("Instance {} stopped", name);
                Ok(())
            }
            Command::Delete { name } => {
                if ctx.factory().delete_instance(&name)? {
                    println!("Instance {} deleted", name);
                    Ok(())
                } else {
                    anyhow::bail!("no instance named {}", name)
                }
            }
            Command::Log { name, lines } => {
                let path = ctx.factory().instance_log_path(&name)?;
                let file = std::fs::File::open(&path)
                    .with_context(|| format!("no log yet at {}", path.display()))?;
                let all: Vec<String> = BufReader::new(file).lines().collect::<std::io::Result<_>>()?;
                for line in &all[all.len().saturating_sub(lines)..] {
                    println!("{}", line);
                }
                Ok(())
            }
            Command::Db(db) => run_db(&ctx, db).await,
        }
    }
}

/// Prints progress and log lines as they arrive.
struct PrintSink;

impl odoo_launcher_lib::progress::EventSink for PrintSink {
    fn emit(&self, event: SetupEvent) {
        print_event(&event);
    }
}

async fn run_setup(ctx: &Context, args: SetupArgs) -> Result<()> {
    let bootstrapper: Arc<dyn DatabaseBootstrapper> = Arc::<PostgresBootstrapper>::clone(&ctx.bootstrapper);
    let pipeline = Arc::new(InstallPipeline::new(
        Arc::clone(&bootstrapper),
        Arc::clone(&ctx.provisioner),
        Arc::new(ctx.factory()),
    ));
    let request = SetupRequest {
        version: args.version,
        name: args.name,
        database_port: args.db_port,
    };

    let stop = StopFlag::new();
    let (handle, mut events) = spawn_full_setup(pipeline, request, stop.clone());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping after the current step...");
                stop.request_stop();
            }
        }
    }

    let result = handle.await.context("setup task panicked")?;

    if !args.keep_db {
        if let Err(e) = bootstrapper.release_engine().await {
            log::warn!("Failed to stop PostgreSQL: {}", e);
        }
    }

    let instance = result?;
    println!(
        "Instance {} is ready. Start it with `odoo-launcher start {}` (http://localhost:{}).",
        instance.name, instance.name, instance.application_port
    );
    Ok(())
}

async fn run_db(ctx: &Context, command: DbCommand) -> Result<()> {
    match command {
        DbCommand::Start => {
            let reporter = Reporter::new(Arc::new(PrintSink));
            match ctx.bootstrapper.ensure_engine(&reporter).await? {
                Some(handle) => println!(
                    "PostgreSQL running on port {} (data: {})",
                    handle.port,
                    handle.data_dir.display()
                ),
                None => println!("Using system PostgreSQL; nothing to start"),
            }
        }
        DbCommand::Stop => {
            if ctx.bootstrapper.attach().await.is_some() {
                ctx.bootstrapper.stop_engine().await?;
                println!("PostgreSQL stopped");
            } else {
                println!("Managed PostgreSQL is not running");
            }
        }
        DbCommand::Status => match ctx.bootstrapper.attach().await {
            Some(handle) => println!(
                "PostgreSQL running on port {} ({})",
                handle.port,
                handle.bin_dir.display()
            ),
            None => println!("Managed PostgreSQL is not running"),
        },
    }
    Ok(())
}
