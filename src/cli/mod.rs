pub mod lifecycle;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "medraxctl")]
#[command(version)]
#[command(about = "Container lifecycle manager for the MedRAX chest X-ray agent", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the medrax:latest image from ./Dockerfile
    Build {
        /// Don't use cache when building
        #[arg(long)]
        no_cache: bool,

        /// Build arguments (format: KEY=VALUE)
        #[arg(long, value_name = "KEY=VALUE")]
        build_arg: Vec<String>,
    },

    /// Start the agent container (replaces any existing instance)
    Start,

    /// Stop and remove the agent container
    Stop,

    /// Restart the agent container (stop, then start)
    Restart,

    /// Show container status
    Status {
        /// Output as JSON (for programmatic use)
        #[arg(long)]
        json: bool,
    },

    /// Stream container logs (Ctrl+C detaches without stopping the container)
    Logs {
        /// Number of trailing lines to start from
        #[arg(short, long, default_value = "50")]
        tail: usize,
    },

    /// Open an interactive shell inside the container
    Shell,

    /// Execute a command inside the running container
    Exec {
        /// Command and arguments to run
        #[arg(trailing_var_arg = true, required = true)]
        args: Vec<String>,
    },

    /// Remove the container and delete transient temp data
    Cleanup,

    /// Pre-download model weights into the mounted cache
    Prefetch,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Build { no_cache, build_arg } => lifecycle::build(no_cache, &build_arg).await,
            Commands::Start => lifecycle::start().await,
            Commands::Stop => lifecycle::stop().await,
            Commands::Restart => lifecycle::restart().await,
            Commands::Status { json } => lifecycle::status(json).await,
            Commands::Logs { tail } => lifecycle::logs(tail).await,
            Commands::Shell => lifecycle::shell().await,
            Commands::Exec { args } => lifecycle::exec(&args).await,
            Commands::Cleanup => lifecycle::cleanup().await,
            Commands::Prefetch => lifecycle::prefetch().await,
        }
    }
}
