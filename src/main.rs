use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cluster;
mod commands;
mod compose;
mod config;
mod error;
mod identity;
mod orchestrator;
mod status;
mod sweeper;

#[derive(Parser)]
#[command(name = "sandboxer")]
#[command(
    author,
    version,
    about = "Provision, inspect, and reclaim per-user sandboxes on Kubernetes"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: commands::GlobalArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, global = true, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sandbox for a user
    Create {
        /// User ID (lowercase DNS label)
        user_id: String,

        /// Environment variable for the sandbox container (repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = commands::create::parse_key_val)]
        env: Vec<(String, String)>,

        /// Variable written to the application's .env file (repeatable)
        #[arg(long = "app-env", value_name = "KEY=VALUE", value_parser = commands::create::parse_key_val)]
        app_env: Vec<(String, String)>,
    },

    /// Delete a user's sandbox (the storage claim is kept)
    Delete {
        /// User ID
        user_id: String,
    },

    /// List sandboxes
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the detailed status of a sandbox
    Status {
        /// User ID
        user_id: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Reclaim sandboxes older than a threshold
    Sweep {
        /// Age threshold in minutes
        #[arg(long, value_name = "MINUTES")]
        older_than: u32,

        /// Cleanup token (must match [cleanup] auth_token)
        #[arg(long, env = "SANDBOXER_SWEEP_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Run the periodic expiry sweep until Ctrl-C
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging on stderr so stdout stays machine-readable
    let filter = if cli.verbose {
        EnvFilter::new("sandboxer=debug")
    } else {
        EnvFilter::new("sandboxer=info")
    };

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    let global = &cli.global;
    match cli.command {
        Commands::Create {
            user_id,
            env,
            app_env,
        } => {
            commands::create::run(global, &user_id, env, app_env).await?;
        }
        Commands::Delete { user_id } => {
            commands::delete::run(global, &user_id).await?;
        }
        Commands::List { json } => {
            commands::list::run(global, json).await?;
        }
        Commands::Status { user_id, json } => {
            commands::status::run(global, &user_id, json).await?;
        }
        Commands::Sweep { older_than, token } => {
            commands::sweep::run(global, older_than, &token).await?;
        }
        Commands::Serve => {
            commands::serve::run(global).await?;
        }
    }

    Ok(())
}
