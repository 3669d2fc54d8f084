mod run;
mod show;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use par_run::config_file::ConfigError;
use par_run::load_config;

/// Exit code for configuration errors, distinct from a failed run
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "par-run", about = "Run groups of shell commands in parallel or in series")]
struct Cli {
    /// Path to config file (auto-detected if not specified)
    #[arg(short, long, global = true)]
    file: Option<String>,

    /// Log file path (receives info level logs in addition to warnings on stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured groups
    Run(run::RunArgs),
    /// Print the configured groups and commands without running them
    Show(show::ShowArgs),
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is::<ConfigError>() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

#[tokio::main]
async fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_file = cli.log_file.as_ref().map(std::fs::File::create).transpose()?;
    par_run::logger::init(log_file);

    let (config, _cwd, config_path) = load_config(cli.file.as_deref())?;
    log::info!("Loaded {}", config_path.display());

    match cli.command {
        Commands::Run(ref args) => run::run(args, &config).await,
        Commands::Show(ref args) => show::run(args, &config),
    }
}
