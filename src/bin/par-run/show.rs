use std::io::Write;
use std::process::ExitCode;

use clap::Args;

use par_run::commands::group::RunConfig;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Also print each command's working directory and environment overrides
    #[arg(long)]
    verbose: bool,
}

/// Print the resolved config.
///
/// # Errors
///
/// Returns an error if writing to stdout fails.
pub fn run(args: &ShowArgs, config: &RunConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut out = std::io::stdout().lock();
    for group in config.groups() {
        let mode = if group.serial { "serial" } else { "parallel" };
        write!(
            out,
            "{} ({mode}, timeout {}s, retries {}",
            group.name,
            group.timeout.as_secs(),
            group.retries
        )?;
        if group.cont_on_fail {
            write!(out, ", continue on failure")?;
        }
        writeln!(out, ")")?;
        if let Some(description) = &group.description {
            writeln!(out, "  {description}")?;
        }
        for cmd in &group.commands {
            writeln!(out, "  {}: {}", cmd.name, cmd.exec)?;
            if args.verbose {
                writeln!(out, "    cwd: {}", cmd.cwd.display())?;
                let mut env: Vec<_> = cmd.env.iter().collect();
                env.sort();
                for (key, value) in env {
                    writeln!(out, "    {key}={value}")?;
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
