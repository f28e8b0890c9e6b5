mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "volreg", about = "3D volume registration tool")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show volume geometry and statistics
    Info(commands::info::InfoArgs),
    /// Register a subject volume to a template
    Register(commands::register::RegisterArgs),
    /// Warp a volume through a saved mapping
    Apply(commands::apply::ApplyArgs),
    /// Motion-correct a series of volumes
    Motion(commands::motion::MotionArgs),
    /// Print or save the default registration config
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Register(args) => commands::register::run(args),
        Commands::Apply(args) => commands::apply::run(args),
        Commands::Motion(args) => commands::motion::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
