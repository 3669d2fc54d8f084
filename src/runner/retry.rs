use std::time::Duration;

use chrono::Utc;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::commands::group::GroupSpec;
use crate::runner::event::Event;
use crate::runner::outcome::{AttemptStatus, CommandOutcome, CommandStatus};
use crate::runner::process::CommandExecutor;

/// Bounded, immediate retry of failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per attempt
    pub timeout: Duration,
    /// Additional attempts after the first failure
    pub retries: u32,
}

impl From<&GroupSpec> for RetryPolicy {
    fn from(group: &GroupSpec) -> Self {
        Self {
            timeout: group.timeout,
            retries: group.retries,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Run attempts until one succeeds, the budget is spent, or `cancel` fires.
    ///
    /// The final status follows the last attempt: `Succeeded` on the first success,
    /// `TimedOut` if the last attempt timed out, `Cancelled` if it was cut short, `Failed`
    /// otherwise. A command cancelled before its first attempt spawns nothing.
    pub async fn run(
        &self,
        executor: &CommandExecutor<'_>,
        cancel: &CancellationToken,
    ) -> CommandOutcome {
        let name = executor.spec().name.clone();
        let group = executor.group().to_string();
        let events = executor.events();

        if cancel.is_cancelled() {
            return resolve(executor, CommandOutcome::cancelled(&name));
        }

        events.publish(Event::CommandStarted {
            group: group.clone(),
            command: name.clone(),
        });
        let mut outcome = CommandOutcome {
            started_at: Some(Utc::now()),
            ..CommandOutcome::cancelled(&name)
        };

        for attempt in 1..=self.max_attempts() {
            if attempt > 1 {
                if cancel.is_cancelled() {
                    debug!("Command '{name}' cancelled between attempts");
                    outcome.status = CommandStatus::Cancelled;
                    break;
                }
                info!(
                    "Retrying '{name}' (attempt {attempt}/{})",
                    self.max_attempts()
                );
                events.publish(Event::CommandRetrying {
                    group: group.clone(),
                    command: name.clone(),
                    next_attempt: attempt,
                });
            }

            let record = executor.run_attempt(attempt, self.timeout, cancel).await;
            let status = record.status();
            outcome.attempts.push(record.clone());
            events.publish(Event::AttemptRecorded {
                group: group.clone(),
                command: name.clone(),
                record,
            });

            outcome.status = status.into();
            if matches!(status, AttemptStatus::Succeeded | AttemptStatus::Cancelled) {
                break;
            }
        }

        outcome.finished_at = Some(Utc::now());
        resolve(executor, outcome)
    }
}

fn resolve(executor: &CommandExecutor<'_>, outcome: CommandOutcome) -> CommandOutcome {
    debug!(
        "Command '{}' resolved as {:?} after {} attempt(s)",
        outcome.name,
        outcome.status,
        outcome.attempts.len()
    );
    executor.events().publish(Event::CommandResolved {
        group: executor.group().to_string(),
        command: outcome.name.clone(),
        status: outcome.status,
        attempts: u32::try_from(outcome.attempts.len()).unwrap_or(u32::MAX),
    });
    outcome
}
