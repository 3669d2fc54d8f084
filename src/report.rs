//! Terminal rendering of engine events and run results

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Duration;

use anstyle::{AnsiColor, Reset, RgbColor, Style};

use crate::commands::group::RunConfig;
use crate::runner::event::{Event, OutputStream};
use crate::runner::outcome::{
    CommandAttempt, CommandOutcome, CommandState, CommandStatus, GroupStatus, RunOutcome,
};

const ACCENT: Style = Style::new().fg_color(Some(anstyle::Color::Rgb(RgbColor(207, 106, 76))));
const SUCCESS: Style = Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Green)));
const FAILURE: Style = Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Red)));
const WARNING: Style = Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Yellow)));
const BOLD: Style = Style::new().bold();
const DIM: Style = Style::new().dimmed();

/// ANSI styling, only emitted when writing to a terminal
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    color: bool,
}

impl Palette {
    #[must_use]
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    #[must_use]
    pub fn for_stdout() -> Self {
        use std::io::IsTerminal;
        Self::new(std::io::stdout().is_terminal())
    }

    fn paint(self, style: Style, s: &str) -> String {
        if self.color {
            format!("{style}{s}{Reset}")
        } else {
            s.to_string()
        }
    }

    fn arrow(self) -> String {
        self.paint(ACCENT, "❱")
    }

    fn status(self, status: CommandStatus) -> String {
        match status {
            CommandStatus::Succeeded => self.paint(SUCCESS, "✓"),
            CommandStatus::Failed | CommandStatus::TimedOut => self.paint(FAILURE, "✘"),
            CommandStatus::Cancelled => self.paint(WARNING, "–"),
        }
    }
}

/// When command output is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// All of a command's output at once, when it resolves
    OnCompletion,
    /// Every line as it arrives, prefixed with the command name
    OnReceive,
}

/// Renders the live event stream, tracking the state of every command it has seen
pub struct Renderer<W: Write> {
    out: W,
    mode: OutputMode,
    palette: Palette,
    states: HashMap<(String, String), CommandState>,
    last_attempt: HashMap<(String, String), CommandAttempt>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, mode: OutputMode, palette: Palette) -> Self {
        Self {
            out,
            mode,
            palette,
            states: HashMap::new(),
            last_attempt: HashMap::new(),
        }
    }

    /// Latest known state of a command
    #[must_use]
    pub fn state(&self, group: &str, command: &str) -> Option<CommandState> {
        self.states
            .get(&(group.to_string(), command.to_string()))
            .copied()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render one event.
    ///
    /// # Errors
    ///
    /// Returns any error from writing to the underlying stream.
    pub fn handle(&mut self, event: &Event) -> io::Result<()> {
        let p = self.palette;
        match event {
            Event::GroupStarted {
                group,
                serial,
                commands,
            } => {
                for command in commands {
                    self.states
                        .insert((group.clone(), command.clone()), CommandState::Pending);
                }
                let mode = if *serial { "serial" } else { "parallel" };
                writeln!(
                    self.out,
                    "{} {}",
                    p.paint(BOLD, &format!("Group {group}")),
                    p.paint(DIM, &format!("({} commands, {mode})", commands.len()))
                )?;
            }
            Event::CommandStarted { group, command } => {
                self.states
                    .insert((group.clone(), command.clone()), CommandState::Running);
                writeln!(self.out, "{} {command}: started", p.arrow())?;
            }
            Event::CommandRetrying {
                group,
                command,
                next_attempt,
            } => {
                self.states
                    .insert((group.clone(), command.clone()), CommandState::Retrying);
                writeln!(
                    self.out,
                    "{} {command}: {}",
                    p.arrow(),
                    p.paint(WARNING, &format!("retrying (attempt {next_attempt})"))
                )?;
            }
            Event::AttemptStarted { group, command, .. } => {
                self.states
                    .insert((group.clone(), command.clone()), CommandState::Running);
            }
            Event::Output {
                command,
                stream,
                line,
                ..
            } if self.mode == OutputMode::OnReceive => {
                let name = match stream {
                    OutputStream::Stdout => command.clone(),
                    OutputStream::Stderr => format!("{command} (stderr)"),
                };
                writeln!(self.out, "{}: {line}", p.paint(DIM, &name))?;
            }
            Event::AttemptRecorded {
                group,
                command,
                record,
            } => {
                self.last_attempt
                    .insert((group.clone(), command.clone()), record.clone());
            }
            Event::CommandResolved {
                group,
                command,
                status,
                ..
            } => {
                let key = (group.clone(), command.clone());
                self.states.insert(key.clone(), (*status).into());
                let attempt = self.last_attempt.remove(&key);
                if self.mode == OutputMode::OnCompletion
                    && let Some(attempt) = &attempt
                {
                    self.out.write_all(attempt.stdout.as_bytes())?;
                    self.out.write_all(attempt.stderr.as_bytes())?;
                }
                writeln!(
                    self.out,
                    "{} {command}: {}",
                    p.status(*status),
                    describe(*status, attempt.as_ref())
                )?;
            }
            Event::GroupResolved {
                group,
                status: GroupStatus::Cancelled,
            } => {
                writeln!(
                    self.out,
                    "{}",
                    p.paint(WARNING, &format!("Group {group} cancelled"))
                )?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn describe(status: CommandStatus, attempt: Option<&CommandAttempt>) -> String {
    match status {
        CommandStatus::Succeeded => "finished".to_string(),
        CommandStatus::Failed => match attempt {
            Some(CommandAttempt {
                exit_code: Some(code),
                ..
            }) => format!("failed (exit code {code})"),
            Some(CommandAttempt {
                error: Some(error), ..
            }) => format!("failed ({error})"),
            _ => "failed".to_string(),
        },
        CommandStatus::TimedOut => "timed out".to_string(),
        CommandStatus::Cancelled => "cancelled".to_string(),
    }
}

#[must_use]
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let tenths = d.subsec_millis() / 100;
    if total_secs < 60 {
        format!("{total_secs}.{tenths}s")
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{mins}m {secs}.{tenths}s")
    }
}

fn status_label(outcome: &CommandOutcome) -> &'static str {
    match outcome.status {
        CommandStatus::Succeeded => "ok",
        CommandStatus::Failed => "failed",
        CommandStatus::TimedOut => "timeout",
        CommandStatus::Cancelled => "cancelled",
    }
}

/// Write a results table (one row per command) followed by a one-line summary.
///
/// # Errors
///
/// Returns any error from writing to `out`.
pub fn write_results<W: Write>(
    out: &mut W,
    config: &RunConfig,
    outcome: &RunOutcome,
    palette: Palette,
) -> io::Result<()> {
    let rows: Vec<[String; 6]> = outcome
        .groups
        .iter()
        .flat_map(|group| {
            group.commands.iter().map(move |cmd| {
                let exec = config
                    .group(&group.name)
                    .and_then(|g| g.command(&cmd.name))
                    .map(|c| c.exec.clone())
                    .unwrap_or_default();
                [
                    group.name.clone(),
                    cmd.name.clone(),
                    exec,
                    status_label(cmd).to_string(),
                    cmd.attempts.len().to_string(),
                    cmd.duration().map_or_else(|| "-".to_string(), format_duration),
                ]
            })
        })
        .collect();

    let header = ["Group", "Name", "Exec", "Status", "Attempts", "Elapsed"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    // Long command lines would push everything else off screen
    widths[2] = widths[2].min(50);

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| {
                let cell: String = cell.chars().take(width).collect();
                format!("{cell:<width$}")
            })
            .collect::<Vec<_>>()
            .join("  ")
    };

    writeln!(out)?;
    writeln!(
        out,
        "{}",
        palette.paint(BOLD, line(&header.map(String::from)[..]).trim_end())
    )?;
    for (row, cmd) in rows.iter().zip(outcome.groups.iter().flat_map(|g| &g.commands)) {
        let style = match cmd.status {
            CommandStatus::Succeeded => SUCCESS,
            CommandStatus::Cancelled => WARNING,
            CommandStatus::Failed | CommandStatus::TimedOut => FAILURE,
        };
        writeln!(out, "{}", palette.paint(style, line(&row[..]).trim_end()))?;
    }
    writeln!(out)?;
    write_summary(out, outcome, palette)
}

fn write_summary<W: Write>(out: &mut W, outcome: &RunOutcome, palette: Palette) -> io::Result<()> {
    let commands: Vec<&CommandOutcome> = outcome.groups.iter().flat_map(|g| &g.commands).collect();
    let count = |f: fn(CommandStatus) -> bool| commands.iter().filter(|c| f(c.status)).count();
    let passed = count(|s| s == CommandStatus::Succeeded);
    let failed = count(CommandStatus::is_failure);
    let cancelled = count(|s| s == CommandStatus::Cancelled);

    let mut parts = Vec::new();
    if passed > 0 {
        parts.push(palette.paint(SUCCESS, &format!("{passed} passed")));
    }
    if failed > 0 {
        parts.push(palette.paint(FAILURE, &format!("{failed} failed")));
    }
    if cancelled > 0 {
        parts.push(palette.paint(WARNING, &format!("{cancelled} cancelled")));
    }

    writeln!(
        out,
        "{} {} {}",
        palette.paint(BOLD, &format!("{} commands:", commands.len())),
        parts.join(&palette.paint(DIM, ", ")),
        palette.paint(DIM, &format!("({})", format_duration(outcome.duration())))
    )
}
