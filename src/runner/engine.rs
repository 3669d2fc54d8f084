use chrono::Utc;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commands::group::RunConfig;
use crate::runner::event::{Event, EventBus};
use crate::runner::group::GroupRunner;
use crate::runner::outcome::{
    EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS, GroupOutcome, GroupStatus, RunOutcome,
    RunStatus,
};

/// Runs the groups of a [`RunConfig`] in order and aggregates the result.
///
/// Cancellation through [`Engine::cancel_token`] is permanent: a cancelled engine resolves
/// every later run as interrupted without spawning anything. Use a new `Engine` per run.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    events: EventBus,
    cancel: CancellationToken,
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event of every run started after this call
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        self.events.subscribe()
    }

    /// Token that aborts the run when cancelled: running commands are terminated and the
    /// remaining groups are cancelled without spawning anything
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every group strictly in order.
    ///
    /// A failed group whose `cont_on_fail` is false aborts the run: every later group is
    /// resolved `Cancelled` without starting. The run succeeds only if every group succeeded.
    pub async fn run(&self, config: &RunConfig) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting run {run_id} with {} groups", config.groups().len());
        self.events.publish(Event::RunStarted {
            run_id,
            groups: config.groups().iter().map(|g| g.name.clone()).collect(),
        });

        let mut groups = Vec::with_capacity(config.groups().len());
        let mut aborted = false;
        for group in config.groups() {
            if aborted || self.cancel.is_cancelled() {
                info!("Cancelling group '{}' without running it", group.name);
                self.events.publish(Event::GroupResolved {
                    group: group.name.clone(),
                    status: GroupStatus::Cancelled,
                });
                groups.push(GroupOutcome::cancelled(group));
                continue;
            }

            let outcome = GroupRunner::new(group, &self.events).run(&self.cancel).await;
            match outcome.status {
                GroupStatus::Failed if !group.cont_on_fail => {
                    warn!("Group '{}' failed, aborting the run", group.name);
                    aborted = true;
                }
                GroupStatus::Cancelled => aborted = true,
                GroupStatus::Failed | GroupStatus::Succeeded => {}
            }
            groups.push(outcome);
        }

        let status = if groups.iter().all(|g| g.status == GroupStatus::Succeeded) {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let exit_code = match status {
            RunStatus::Succeeded => EXIT_SUCCESS,
            RunStatus::Failed if self.cancel.is_cancelled() => EXIT_INTERRUPTED,
            RunStatus::Failed => EXIT_FAILURE,
        };
        info!("Run {run_id} resolved as {status:?} (exit code {exit_code})");
        self.events.publish(Event::RunResolved {
            run_id,
            status,
            exit_code,
        });

        RunOutcome {
            run_id,
            status,
            exit_code,
            groups,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::command::CommandSpec;
    use crate::commands::group::GroupSpec;

    fn group(name: &str, cont_on_fail: bool, commands: Vec<CommandSpec>) -> GroupSpec {
        GroupSpec {
            cont_on_fail,
            ..GroupSpec::new(name, commands)
        }
    }

    #[tokio::test]
    async fn test_all_groups_succeed() {
        let config = RunConfig::new(vec![
            group("one", false, vec![CommandSpec::new("a", "true")]),
            group("two", false, vec![CommandSpec::new("b", "true")]),
        ])
        .unwrap();
        let outcome = Engine::new().run(&config).await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.exit_code, EXIT_SUCCESS);
        assert_eq!(outcome.groups.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_group_aborts_later_groups() {
        let config = RunConfig::new(vec![
            group("one", false, vec![CommandSpec::new("a", "exit 1")]),
            group("two", false, vec![CommandSpec::new("b", "true")]),
            group("three", true, vec![CommandSpec::new("c", "true")]),
        ])
        .unwrap();
        let outcome = Engine::new().run(&config).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.exit_code, EXIT_FAILURE);
        assert_eq!(outcome.group("one").unwrap().status, GroupStatus::Failed);
        for name in ["two", "three"] {
            let skipped = outcome.group(name).unwrap();
            assert_eq!(skipped.status, GroupStatus::Cancelled);
            assert!(skipped.started_at.is_none());
            assert!(skipped.commands.iter().all(|c| c.attempts.is_empty()));
        }
    }

    #[tokio::test]
    async fn test_cont_on_fail_group_lets_run_continue() {
        let config = RunConfig::new(vec![
            group("one", true, vec![CommandSpec::new("a", "exit 1")]),
            group("two", false, vec![CommandSpec::new("b", "true")]),
        ])
        .unwrap();
        let outcome = Engine::new().run(&config).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.exit_code, EXIT_FAILURE);
        assert_eq!(outcome.group("two").unwrap().status, GroupStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_external_cancel_interrupts_run() {
        let config = RunConfig::new(vec![
            group("one", true, vec![CommandSpec::new("a", "sleep 10")]),
            group("two", true, vec![CommandSpec::new("b", "true")]),
        ])
        .unwrap();
        let engine = Engine::new();
        let cancel = engine.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            cancel.cancel();
        });
        let outcome = engine.run(&config).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.exit_code, EXIT_INTERRUPTED);
        assert_eq!(outcome.group("one").unwrap().status, GroupStatus::Cancelled);
        assert_eq!(outcome.group("two").unwrap().status, GroupStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_engine_spawns_nothing_on_later_runs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let config = RunConfig::new(vec![group(
            "one",
            false,
            vec![CommandSpec::new("mark", format!("touch {}", marker.display()))],
        )])
        .unwrap();
        let engine = Engine::new();
        engine.cancel_token().cancel();

        for _ in 0..2 {
            let outcome = engine.run(&config).await;
            assert_eq!(outcome.exit_code, EXIT_INTERRUPTED);
            assert_eq!(outcome.group("one").unwrap().status, GroupStatus::Cancelled);
        }
        assert!(!marker.exists());

        let outcome = Engine::new().run(&config).await;
        assert_eq!(outcome.exit_code, EXIT_SUCCESS);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_run_events_bracket_groups() {
        let config = RunConfig::new(vec![
            group("one", false, vec![CommandSpec::new("a", "exit 1")]),
            group("two", false, vec![CommandSpec::new("b", "true")]),
        ])
        .unwrap();
        let engine = Engine::new();
        let mut rx = engine.subscribe();
        engine.run(&config).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(Event::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(Event::RunResolved { exit_code: EXIT_FAILURE, .. })
        ));
        assert!(events.contains(&Event::GroupResolved {
            group: "two".to_string(),
            status: GroupStatus::Cancelled,
        }));
        assert!(!events.iter().any(|e| matches!(
            e,
            Event::CommandStarted { group, .. } if group == "two"
        )));
    }
}
