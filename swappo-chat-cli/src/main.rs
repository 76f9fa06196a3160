use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use swappo_chat_core::{Database, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{
    handle_messages_command, handle_rooms_command, handle_stats_command, handle_unread_command,
    handle_worker_command, MessagesCommand, RoomsCommand, UnreadCommand,
};
use config::{mask_password, CliConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "swappo-chat")]
#[command(version = VERSION)]
#[command(about = "Swappo Chat - trade-offer conversations, read receipts and notifications")]
#[command(long_about = r#"
Swappo Chat manages the conversation attached to each accepted trade offer:
rooms, ordered messages with delivery and read receipts, per-user unread
counters, and push notifications for the other participant.

Use 'swappo-chat init' to run migrations, then 'swappo-chat worker' to run
the notification dispatcher alongside the API.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, help = "Use an in-memory store instead of PostgreSQL")]
    memory: bool,

    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize the database and run migrations")]
    Init,

    #[command(about = "Create, inspect, list and deactivate chat rooms")]
    Rooms {
        #[command(subcommand)]
        action: RoomsCommand,
    },

    #[command(about = "Send, list and acknowledge messages")]
    Messages {
        #[command(subcommand)]
        action: MessagesCommand,
    },

    #[command(about = "Inspect and reconcile unread counters")]
    Unread {
        #[command(subcommand)]
        action: UnreadCommand,
    },

    #[command(about = "Show chat statistics")]
    Stats {
        #[arg(short, long, help = "Restrict to rooms this user participates in")]
        user: Option<String>,

        #[arg(short, long, default_value = "text")]
        format: String,
    },

    #[command(about = "Run the notification dispatcher until interrupted")]
    Worker {
        #[arg(long, default_value = "60", help = "Seconds between stats log lines, 0 to disable")]
        stats_interval: u64,
    },

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version { detailed } = cli.command {
        cmd_version(detailed);
        return ExitCode::SUCCESS;
    }

    let config = match CliConfig::load(cli.memory, cli.database_url.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.chat.logging);

    match run(cli.command, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(fmt::layer().json().with_target(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

async fn run(command: Commands, config: CliConfig) -> anyhow::Result<()> {
    match command {
        Commands::Init => cmd_init(&config).await,
        Commands::Rooms { action } => handle_rooms_command(action, &config).await,
        Commands::Messages { action } => handle_messages_command(action, &config).await,
        Commands::Unread { action } => handle_unread_command(action, &config).await,
        Commands::Stats { user, format } => {
            handle_stats_command(user.as_deref(), &format, &config).await
        }
        Commands::Worker { stats_interval } => handle_worker_command(stats_interval, &config).await,
        Commands::Version { detailed } => {
            cmd_version(detailed);
            Ok(())
        }
    }
}

async fn cmd_init(config: &CliConfig) -> anyhow::Result<()> {
    if config.memory {
        anyhow::bail!("'init' needs PostgreSQL; drop --memory");
    }

    println!("{}", "Initializing Swappo Chat...".cyan().bold());
    println!();

    println!(
        "  {} Database URL: {}",
        "→".blue(),
        mask_password(config.database_url())
    );

    println!("  {} Connecting to database...", "→".blue());
    let db = Database::connect(&config.chat.database).await?;

    println!("  {} Running migrations...", "→".blue());
    db.run_migrations().await?;

    println!("  {} Verifying connection...", "→".blue());
    db.health_check().await?;

    db.close().await;

    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        "Database initialized successfully!".green()
    );

    Ok(())
}

fn cmd_version(detailed: bool) {
    if detailed {
        println!("{}", "Swappo Chat Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!();
        println!("  {}", "Build Information:".bold());
        println!("    Rust Edition: 2021");
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("swappo-chat {}", VERSION);
    }
}
