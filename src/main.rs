//! xsh - run commands and copy files across groups of hosts.
//!
//! Usage:
//!   xsh do -g <group> [-a <address>] <command line>    Run commands
//!   xsh sudo -g <group> [-a <address>] <command line>  Run commands escalated
//!   xsh copy -g <group> [-a <address>] <copy line>     Upload or download
//!   xsh task <file>                                    Run a task file
//!   xsh show groups | show addresses -g <group>        Inspect the inventory

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use xsh::{
    ActionBuilder, Directory, DispatchConfig, Dispatcher, GlobalConfig, InMemoryDirectory, Mode,
    OutputFormat, SessionContext, SystemSshConfig, SystemSshTransport, TaskFileBuilder, YamlLoader,
    render_action, render_task,
};

/// xsh - run commands and copy files across groups of hosts
#[derive(Parser)]
#[command(name = "xsh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Global settings file (default: ./xsh.yaml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host inventory file
    #[arg(short, long, global = true, value_name = "FILE", default_value = "hosts.yaml")]
    inventory: PathBuf,

    /// Output format: text, json or yaml
    #[arg(short, long, global = true)]
    output: Option<OutputFormat>,

    /// Maximum simultaneously open sessions
    #[arg(short = 'j', long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands as the login user
    Do(LineArgs),

    /// Run commands through privilege escalation
    Sudo(LineArgs),

    /// Copy files: `local -> remote/` uploads, `local/ <- remote` downloads
    Copy(LineArgs),

    /// Run every action of a task file in order
    Task {
        /// Path to the task file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Inspect the inventory
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },
}

#[derive(Args)]
struct LineArgs {
    /// Target group
    #[arg(short, long)]
    group: String,

    /// Narrow the target to one address of the group
    #[arg(short, long)]
    address: Option<String>,

    /// The operator line
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    line: Vec<String>,
}

#[derive(Subcommand)]
enum ShowCommand {
    /// List group names
    Groups,

    /// List the addresses of a group
    Addresses {
        #[arg(short, long)]
        group: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr, results to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = load_global(cli.config.as_deref(), cli.concurrency)?;
    let format = cli.output.or(global.output).unwrap_or_default();
    let directory = Arc::new(InMemoryDirectory::from_inventory(
        &YamlLoader::load_inventory(&cli.inventory)?,
    )?);

    match cli.command {
        Commands::Do(args) => run_line(&global, directory, format, Mode::Do, args).await,
        Commands::Sudo(args) => run_line(&global, directory, format, Mode::Sudo, args).await,
        Commands::Copy(args) => run_line(&global, directory, format, Mode::Copy, args).await,
        Commands::Task { file } => run_task_file(&global, directory, format, &file).await,
        Commands::Show { what } => {
            show(directory.as_ref(), what)?;
            Ok(())
        }
    }
}

/// Load global settings, falling back to defaults when no file is present.
fn load_global(
    path: Option<&Path>,
    concurrency: Option<usize>,
) -> Result<GlobalConfig, Box<dyn std::error::Error>> {
    let mut global = match path {
        Some(path) => YamlLoader::load_global_config(path)?,
        None if Path::new("xsh.yaml").exists() => YamlLoader::load_global_config("xsh.yaml")?,
        None => GlobalConfig::default(),
    };

    if let Some(concurrency) = concurrency {
        if concurrency == 0 {
            return Err("--concurrency must be greater than zero".into());
        }
        global.max_concurrency = Some(concurrency);
    }

    debug!(?global, "loaded settings");
    Ok(global)
}

fn dispatcher(global: &GlobalConfig, directory: Arc<InMemoryDirectory>) -> Dispatcher {
    let transport = SystemSshTransport::new(SystemSshConfig::from(global));
    let dispatcher = Dispatcher::new(directory, Arc::new(transport), DispatchConfig::from(global));

    let cancel = dispatcher.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling remaining hosts");
            cancel.cancel();
        }
    });

    dispatcher
}

/// Run one operator line.
async fn run_line(
    global: &GlobalConfig,
    directory: Arc<InMemoryDirectory>,
    format: OutputFormat,
    mode: Mode,
    args: LineArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = SessionContext::new().with_group(args.group).with_mode(mode);
    if let Some(address) = args.address {
        ctx = ctx.with_address(address);
    }

    let builder =
        ActionBuilder::new(directory.clone()).separator(global.command_separator());
    let action = builder.build_line(&ctx, &args.line.join(" "))?;

    let result = dispatcher(global, directory).dispatch(&action).await?;
    print!("{}", render_action(&result, format)?);

    let failed = result.failed_hosts();
    if failed.is_empty() {
        Ok(())
    } else {
        let message = format!("{} host(s) failed: {}", failed.len(), failed.join(", "));
        Err(message.into())
    }
}

/// Run a task file.
async fn run_task_file(
    global: &GlobalConfig,
    directory: Arc<InMemoryDirectory>,
    format: OutputFormat,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let task = YamlLoader::load_task_file(file)?;
    let builder =
        ActionBuilder::new(directory.clone()).separator(global.command_separator());
    let actions = TaskFileBuilder::build(&task, &builder)?;

    let result = dispatcher(global, directory)
        .run_task(&task.name, &actions)
        .await;
    print!("{}", render_task(&result, format)?);

    if result.success() {
        Ok(())
    } else {
        let message = format!("task '{}' did not complete cleanly", result.name);
        Err(message.into())
    }
}

fn show(directory: &dyn Directory, what: ShowCommand) -> Result<(), Box<dyn std::error::Error>> {
    match what {
        ShowCommand::Groups => {
            for name in directory.group_names() {
                println!("{name}");
            }
        }
        ShowCommand::Addresses { group } => {
            for address in directory.addresses(&group)? {
                println!("{address}");
            }
        }
    }
    Ok(())
}
