use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use longscribe::cli::commands;

#[derive(Parser)]
#[command(name = "longscribe")]
#[command(version, about = "Long-form content generation from researched sources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize longscribe in the current directory
    Init {
        #[arg(long, short, help = "Overwrite existing initialization")]
        force: bool,
    },

    /// Create jobs from an order file (toml, json or yaml)
    Submit {
        #[arg(help = "Order file")]
        order_file: PathBuf,
    },

    /// Run a job, or every pending job of an order
    Run {
        #[arg(help = "Job ID", required_unless_present = "order", conflicts_with = "order")]
        job_id: Option<String>,
        #[arg(long, help = "Run all pending jobs of this order in sequence")]
        order: Option<String>,
    },

    /// Show the progress of a job
    Status {
        #[arg(help = "Job ID")]
        job_id: String,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Print the generated document of a job
    Show {
        #[arg(help = "Job ID")]
        job_id: String,
        #[arg(long, help = "Print the full content JSON with reports")]
        report: bool,
    },

    /// Print the model-call audit log of a job
    Audit {
        #[arg(help = "Job ID")]
        job_id: String,
        #[arg(long, help = "Include full prompts and outputs")]
        full: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(short = 'f', long, default_value = "toml", help = "Output format: toml, json")]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mlongscribe encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Submit { order_file } => commands::submit::run(&order_file)?,
        Commands::Run { job_id, order } => {
            let rt = Runtime::new()?;
            match (job_id, order) {
                (_, Some(order_id)) => rt.block_on(commands::run::run_order(&order_id))?,
                (Some(job_id), None) => rt.block_on(commands::run::run_job(&job_id))?,
                (None, None) => anyhow::bail!("either a job ID or --order is required"),
            }
        }
        Commands::Status { job_id, format } => commands::status::run(&job_id, &format)?,
        Commands::Show { job_id, report } => commands::show::run(&job_id, report)?,
        Commands::Audit { job_id, full } => commands::audit::run(&job_id, full)?,
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => commands::config::show(global, &format)?,
            ConfigAction::Path => commands::config::path()?,
            ConfigAction::Init { global, force } => commands::config::init(global, force)?,
        },
    }

    Ok(())
}
