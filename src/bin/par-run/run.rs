use std::io::Write;
use std::process::ExitCode;

use clap::{Args, ValueEnum};
use log::warn;

use par_run::commands::group::RunConfig;
use par_run::report::{OutputMode, Palette, Renderer, write_results};
use par_run::runner::Engine;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only run these groups (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub groups: Option<Vec<String>>,

    /// Only run these commands (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub cmds: Option<Vec<String>>,

    /// When to print command output
    #[arg(long, value_enum, default_value_t = Style::Comp)]
    pub style: Style,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Print a command's output once it completes
    Comp,
    /// Print output lines as they are received
    Recv,
}

impl From<Style> for OutputMode {
    fn from(style: Style) -> Self {
        match style {
            Style::Comp => OutputMode::OnCompletion,
            Style::Recv => OutputMode::OnReceive,
        }
    }
}

/// Run the selected groups, rendering events live and the results table at the end.
///
/// # Errors
///
/// Returns an error if writing to stdout fails or a name passed to `--groups`/`--cmds` is
/// not in the config.
pub async fn run(
    args: &RunArgs,
    config: &RunConfig,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    check_names(args, config)?;
    let config = config.select(args.groups.as_deref(), args.cmds.as_deref());
    if config.is_empty() {
        warn!("No commands selected, nothing to run");
        return Ok(ExitCode::SUCCESS);
    }

    let engine = Engine::new();
    let palette = Palette::for_stdout();
    let mode = OutputMode::from(args.style);
    let mut rx = engine.subscribe();
    let printer = tokio::spawn(async move {
        let mut renderer = Renderer::new(std::io::stdout(), mode, palette);
        while let Some(event) = rx.recv().await {
            if let Err(e) = renderer.handle(&event) {
                warn!("Failed to write output: {e}");
                break;
            }
        }
    });

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the run");
            cancel.cancel();
        }
    });

    let outcome = engine.run(&config).await;
    // Closing the bus lets the printer drain what is left and stop
    drop(engine);
    printer.await?;

    let mut stdout = std::io::stdout().lock();
    write_results(&mut stdout, &config, &outcome, palette)?;
    stdout.flush()?;

    Ok(ExitCode::from(u8::try_from(outcome.exit_code).unwrap_or(1)))
}

fn check_names(args: &RunArgs, config: &RunConfig) -> Result<(), String> {
    for name in args.groups.iter().flatten() {
        if config.group(name).is_none() {
            return Err(format!("Unknown group: {name}"));
        }
    }
    for name in args.cmds.iter().flatten() {
        if !config.all_commands().iter().any(|(_, c)| &c.name == name) {
            return Err(format!("Unknown command: {name}"));
        }
    }
    Ok(())
}
