use chrono::Utc;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::commands::command::CommandSpec;
use crate::commands::group::GroupSpec;
use crate::runner::event::{Event, EventBus};
use crate::runner::outcome::{CommandOutcome, CommandStatus, GroupOutcome, GroupStatus};
use crate::runner::process::CommandExecutor;
use crate::runner::retry::RetryPolicy;

/// Executes every command of one group, honouring its mode and failure policy
pub struct GroupRunner<'a> {
    group: &'a GroupSpec,
    events: &'a EventBus,
}

impl<'a> GroupRunner<'a> {
    #[must_use]
    pub fn new(group: &'a GroupSpec, events: &'a EventBus) -> Self {
        Self { group, events }
    }

    /// Run the group to completion.
    ///
    /// Cancelling `cancel` cancels every command of the group. A failing command cancels only
    /// this group's siblings (when `cont_on_fail` is false), never `cancel` itself: whether the
    /// run continues is the engine's call.
    pub async fn run(&self, cancel: &CancellationToken) -> GroupOutcome {
        let group = self.group;
        info!(
            "Running group '{}' ({} commands, {})",
            group.name,
            group.commands.len(),
            if group.serial { "serial" } else { "parallel" }
        );
        self.events.publish(Event::GroupStarted {
            group: group.name.clone(),
            serial: group.serial,
            commands: group.commands.iter().map(|c| c.name.clone()).collect(),
        });

        let siblings = cancel.child_token();
        let started_at = Utc::now();
        let commands = if group.serial {
            self.run_serial(&siblings).await
        } else {
            self.run_parallel(&siblings).await
        };
        let finished_at = Utc::now();

        let status = GroupStatus::from_commands(&commands);
        info!("Group '{}' resolved as {status:?}", group.name);
        self.events.publish(Event::GroupResolved {
            group: group.name.clone(),
            status,
        });
        GroupOutcome {
            name: group.name.clone(),
            status,
            commands,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
        }
    }

    async fn run_serial(&self, siblings: &CancellationToken) -> Vec<CommandOutcome> {
        let mut outcomes = Vec::with_capacity(self.group.commands.len());
        for spec in &self.group.commands {
            if siblings.is_cancelled() {
                outcomes.push(self.skip(spec));
            } else {
                outcomes.push(self.run_command(spec, siblings).await);
            }
        }
        outcomes
    }

    async fn run_parallel(&self, siblings: &CancellationToken) -> Vec<CommandOutcome> {
        join_all(
            self.group
                .commands
                .iter()
                .map(|spec| self.run_command(spec, siblings)),
        )
        .await
    }

    async fn run_command(&self, spec: &CommandSpec, siblings: &CancellationToken) -> CommandOutcome {
        let executor = CommandExecutor::new(&self.group.name, spec, self.events);
        let outcome = RetryPolicy::from(self.group).run(&executor, siblings).await;
        if outcome.status.is_failure() && !self.group.cont_on_fail && !siblings.is_cancelled() {
            warn!(
                "Command '{}' {:?}, cancelling the rest of group '{}'",
                spec.name, outcome.status, self.group.name
            );
            siblings.cancel();
        }
        outcome
    }

    /// Resolve a not-yet-started command as cancelled without spawning it
    fn skip(&self, spec: &CommandSpec) -> CommandOutcome {
        debug!("Skipping '{}' in cancelled group '{}'", spec.name, self.group.name);
        self.events.publish(Event::CommandResolved {
            group: self.group.name.clone(),
            command: spec.name.clone(),
            status: CommandStatus::Cancelled,
            attempts: 0,
        });
        CommandOutcome::cancelled(&spec.name)
    }
}
