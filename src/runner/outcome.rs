use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commands::group::GroupSpec;

pub const EXIT_SUCCESS: i32 = 0;
/// At least one group failed
pub const EXIT_FAILURE: i32 = 1;
/// The run was cancelled from outside (eg Ctrl-C) before it could finish
pub const EXIT_INTERRUPTED: i32 = 130;

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Terminal status of a command once its retry budget is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Succeeded,
    /// Retries exhausted, last attempt exited non-zero or could not be spawned
    Failed,
    /// Last attempt hit the group timeout
    TimedOut,
    /// Aborted before completion by a sibling failure or a run abort
    Cancelled,
}

impl CommandStatus {
    /// `Failed` or `TimedOut`, the statuses that trigger the group's failure policy
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, CommandStatus::Failed | CommandStatus::TimedOut)
    }
}

impl From<AttemptStatus> for CommandStatus {
    fn from(status: AttemptStatus) -> Self {
        match status {
            AttemptStatus::Succeeded => CommandStatus::Succeeded,
            AttemptStatus::Failed => CommandStatus::Failed,
            AttemptStatus::TimedOut => CommandStatus::TimedOut,
            AttemptStatus::Cancelled => CommandStatus::Cancelled,
        }
    }
}

/// Live state of a command, including the transient states an observer can see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl CommandState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            CommandState::Pending | CommandState::Running | CommandState::Retrying
        )
    }
}

impl From<CommandStatus> for CommandState {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Succeeded => CommandState::Succeeded,
            CommandStatus::Failed => CommandState::Failed,
            CommandStatus::TimedOut => CommandState::TimedOut,
            CommandStatus::Cancelled => CommandState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl GroupStatus {
    /// Any failed or timed-out command fails the group, even if siblings were cancelled
    /// afterwards; otherwise any cancellation means the group was aborted.
    #[must_use]
    pub fn from_commands(commands: &[CommandOutcome]) -> Self {
        if commands.iter().any(|c| c.status.is_failure()) {
            GroupStatus::Failed
        } else if commands
            .iter()
            .any(|c| c.status == CommandStatus::Cancelled)
        {
            GroupStatus::Cancelled
        } else {
            GroupStatus::Succeeded
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// One execution try of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAttempt {
    /// 1-based
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process timed out, was cancelled, was killed by a signal or never spawned
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Spawn or wait failure, or the signal that killed the process
    pub error: Option<String>,
}

impl CommandAttempt {
    #[must_use]
    pub fn new(attempt: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            started_at,
            finished_at: started_at,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
            cancelled: false,
            error: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        if self.cancelled {
            AttemptStatus::Cancelled
        } else if self.timed_out {
            AttemptStatus::TimedOut
        } else if self.exit_code == Some(0) {
            AttemptStatus::Succeeded
        } else {
            AttemptStatus::Failed
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Final record of a command: every attempt made, in order, plus the settled status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub name: String,
    pub status: CommandStatus,
    pub attempts: Vec<CommandAttempt>,
    /// `None` if the command was cancelled before it ever started
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CommandOutcome {
    /// A command that never got to spawn a process
    #[must_use]
    pub fn cancelled(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CommandStatus::Cancelled,
            attempts: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    #[must_use]
    pub fn last_attempt(&self) -> Option<&CommandAttempt> {
        self.attempts.last()
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.last_attempt().and_then(|a| a.exit_code)
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).to_std().unwrap_or_default()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub name: String,
    pub status: GroupStatus,
    /// In declared order
    pub commands: Vec<CommandOutcome>,
    /// `None` if the group was cancelled before it started
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GroupOutcome {
    /// A group skipped because an earlier group aborted the run
    #[must_use]
    pub fn cancelled(group: &GroupSpec) -> Self {
        Self {
            name: group.name.clone(),
            status: GroupStatus::Cancelled,
            commands: group
                .commands
                .iter()
                .map(|c| CommandOutcome::cancelled(&c.name))
                .collect(),
            started_at: None,
            finished_at: None,
        }
    }

    #[must_use]
    pub fn command(&self, name: &str) -> Option<&CommandOutcome> {
        self.commands.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub exit_code: i32,
    /// Groups in configured order, including the ones cancelled after an abort
    pub groups: Vec<GroupOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupOutcome> {
        self.groups.iter().find(|g| g.name == name)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}
