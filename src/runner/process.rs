use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::command::CommandSpec;
use crate::runner::event::{Event, EventBus, OutputStream};
use crate::runner::outcome::CommandAttempt;

/// How long a terminated process group gets to exit after SIGTERM before SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long to keep draining stdout/stderr once the process is gone.
///
/// Background jobs started by the command may hold the pipes open indefinitely.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Unable to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Unable to wait for process: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Unable to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: std::io::Error,
    },
}

/// Merge command overrides over an inherited environment; overrides win on key collision
#[must_use]
pub fn resolve_env<I>(
    inherited: I,
    overrides: &HashMap<String, String>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = inherited.into_iter().collect();
    env.extend(
        overrides
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v))),
    );
    env
}

impl From<&CommandSpec> for tokio::process::Command {
    fn from(spec: &CommandSpec) -> Self {
        debug!("Building command '{}' in {}", spec.exec, spec.cwd.display());
        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&spec.exec)
            .env_clear()
            .envs(resolve_env(std::env::vars_os(), &spec.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group, so the whole tree can be signalled at once
            .process_group(0)
            .kill_on_drop(true);
        if !spec.cwd.as_os_str().is_empty() {
            command.current_dir(&spec.cwd);
        }
        command
    }
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Where captured output lines are published
#[derive(Clone)]
struct LineSink {
    events: EventBus,
    group: String,
    command: String,
    attempt: u32,
}

impl LineSink {
    fn line(&self, stream: OutputStream, line: String) {
        self.events.publish(Event::Output {
            group: self.group.clone(),
            command: self.command.clone(),
            attempt: self.attempt,
            stream,
            line,
        });
    }
}

/// Read lines into `buffer` as they arrive, so partial output survives an aborted reader
async fn capture<R: AsyncRead + Unpin>(
    reader: R,
    stream: OutputStream,
    buffer: Arc<Mutex<Vec<u8>>>,
    sink: LineSink,
) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                buffer.lock().extend_from_slice(&line);
                let text = String::from_utf8_lossy(&line);
                sink.line(stream, text.trim_end_matches(['\r', '\n']).to_string());
            }
            Err(e) => {
                debug!("Output capture for '{}' stopped: {e}", sink.command);
                break;
            }
        }
    }
}

async fn collect(task: Option<JoinHandle<()>>, buffer: &Mutex<Vec<u8>>) -> String {
    if let Some(mut task) = task
        && tokio::time::timeout(IO_CAPTURE_TIMEOUT, &mut task)
            .await
            .is_err()
    {
        debug!("Output pipe still open after process exit, abandoning reader");
        task.abort();
    }
    String::from_utf8_lossy(&buffer.lock()).into_owned()
}

fn signal_group(pgid: i32, signal: libc::c_int) -> Result<(), ProcessError> {
    // SAFETY: killpg has no memory-safety preconditions
    if unsafe { libc::killpg(pgid, signal) } == 0 {
        Ok(())
    } else {
        let source = std::io::Error::last_os_error();
        if source.raw_os_error() == Some(libc::ESRCH) {
            // Group already gone
            Ok(())
        } else {
            Err(ProcessError::Signal { pgid, source })
        }
    }
}

/// SIGTERM the child's process group, SIGKILL it after a grace period, and reap the child
async fn terminate(child: &mut Child) -> Result<(), ProcessError> {
    // Already reaped
    let Some(pgid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return Ok(());
    };
    signal_group(pgid, libc::SIGTERM)?;
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        debug!("Process group {pgid} ignored SIGTERM, killing");
    }
    // Sweep descendants that outlived the shell
    signal_group(pgid, libc::SIGKILL)?;
    child.wait().await.map_err(ProcessError::Wait)?;
    Ok(())
}

/// Runs single attempts of one command as a child process
pub struct CommandExecutor<'a> {
    group: &'a str,
    spec: &'a CommandSpec,
    events: &'a EventBus,
}

impl<'a> CommandExecutor<'a> {
    #[must_use]
    pub fn new(group: &'a str, spec: &'a CommandSpec, events: &'a EventBus) -> Self {
        Self {
            group,
            spec,
            events,
        }
    }

    #[must_use]
    pub fn group(&self) -> &str {
        self.group
    }

    #[must_use]
    pub fn spec(&self) -> &CommandSpec {
        self.spec
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        self.events
    }

    /// Run one attempt, racing process exit against `timeout` and `cancel`.
    ///
    /// Never fails: spawn errors, non-zero exits, timeouts and cancellations are all
    /// recorded on the returned attempt.
    pub async fn run_attempt(
        &self,
        attempt: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CommandAttempt {
        let mut record = CommandAttempt::new(attempt, Utc::now());
        self.events.publish(Event::AttemptStarted {
            group: self.group.to_string(),
            command: self.spec.name.clone(),
            attempt,
        });

        let mut child = match tokio::process::Command::from(self.spec).spawn() {
            Ok(child) => child,
            Err(e) => {
                let e = ProcessError::Spawn(e);
                warn!("Command '{}' attempt {attempt}: {e}", self.spec.name);
                record.error = Some(e.to_string());
                record.finished_at = Utc::now();
                return record;
            }
        };

        let sink = LineSink {
            events: self.events.clone(),
            group: self.group.to_string(),
            command: self.spec.name.clone(),
            attempt,
        };
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(capture(
                out,
                OutputStream::Stdout,
                Arc::clone(&stdout_buf),
                sink.clone(),
            ))
        });
        let stderr_task = child.stderr.take().map(|err| {
            tokio::spawn(capture(
                err,
                OutputStream::Stderr,
                Arc::clone(&stderr_buf),
                sink,
            ))
        });

        let ending = tokio::select! {
            biased;
            status = child.wait() => Ending::Exited(status),
            () = cancel.cancelled() => Ending::Cancelled,
            () = tokio::time::sleep(timeout) => Ending::TimedOut,
        };

        match ending {
            Ending::Exited(Ok(status)) => {
                record.exit_code = status.code();
                if let Some(signal) = status.signal() {
                    record.error = Some(format!("terminated by signal {signal}"));
                }
            }
            Ending::Exited(Err(e)) => {
                let e = ProcessError::Wait(e);
                warn!("Command '{}' attempt {attempt}: {e}", self.spec.name);
                record.error = Some(e.to_string());
                if let Err(e) = terminate(&mut child).await {
                    warn!("Failed to terminate '{}': {e}", self.spec.name);
                }
            }
            Ending::TimedOut => {
                debug!(
                    "Command '{}' attempt {attempt} timed out after {timeout:?}, terminating",
                    self.spec.name
                );
                record.timed_out = true;
                if let Err(e) = terminate(&mut child).await {
                    warn!("Failed to terminate timed out '{}': {e}", self.spec.name);
                }
            }
            Ending::Cancelled => {
                debug!(
                    "Command '{}' attempt {attempt} cancelled, terminating",
                    self.spec.name
                );
                record.cancelled = true;
                if let Err(e) = terminate(&mut child).await {
                    warn!("Failed to terminate cancelled '{}': {e}", self.spec.name);
                }
            }
        }

        record.stdout = collect(stdout_task, &stdout_buf).await;
        record.stderr = collect(stderr_task, &stderr_buf).await;
        record.finished_at = Utc::now();
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::outcome::AttemptStatus;
    use std::time::Instant;

    async fn run(spec: &CommandSpec, timeout: Duration) -> CommandAttempt {
        let events = EventBus::new();
        CommandExecutor::new("group", spec, &events)
            .run_attempt(1, timeout, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_echo_passes() {
        let spec = CommandSpec::new("echo", "echo hello; echo oops >&2");
        let attempt = run(&spec, Duration::from_secs(5)).await;
        assert_eq!(attempt.status(), AttemptStatus::Succeeded);
        assert_eq!(attempt.exit_code, Some(0));
        assert_eq!(attempt.stdout, "hello\n");
        assert_eq!(attempt.stderr, "oops\n");
        assert!(attempt.finished_at >= attempt.started_at);
    }

    #[tokio::test]
    async fn test_exit_code_recorded() {
        let spec = CommandSpec::new("fail", "exit 3");
        let attempt = run(&spec, Duration::from_secs(5)).await;
        assert_eq!(attempt.status(), AttemptStatus::Failed);
        assert_eq!(attempt.exit_code, Some(3));
        assert!(!attempt.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_kills_process_tree() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        // The grandchild would create the marker if it outlived the timeout
        let spec = CommandSpec::new(
            "slow",
            format!("(sleep 2 && touch {}) & sleep 10", marker.display()),
        );
        let start = Instant::now();
        let attempt = run(&spec, Duration::from_millis(200)).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(attempt.status(), AttemptStatus::TimedOut);
        assert_eq!(attempt.exit_code, None);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_cancel_terminates_attempt() {
        let events = EventBus::new();
        let spec = CommandSpec::new("slow", "sleep 10");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        let attempt = CommandExecutor::new("group", &spec, &events)
            .run_attempt(1, Duration::from_secs(30), &cancel)
            .await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(attempt.status(), AttemptStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_cwd_is_a_failed_attempt() {
        let spec = CommandSpec::new("nowhere", "true").with_cwd("/definitely/not/here");
        let attempt = run(&spec, Duration::from_secs(5)).await;
        assert_eq!(attempt.status(), AttemptStatus::Failed);
        assert!(attempt.error.unwrap().contains("spawn"));
    }

    #[tokio::test]
    async fn test_env_overrides_win() {
        let spec = CommandSpec::new("env", "echo $HOME:$PAR_RUN_TEST")
            .with_env("HOME", "/override")
            .with_env("PAR_RUN_TEST", "yes");
        let attempt = run(&spec, Duration::from_secs(5)).await;
        assert_eq!(attempt.stdout, "/override:yes\n");
    }

    #[tokio::test]
    async fn test_output_lines_are_published() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let spec = CommandSpec::new("lines", "printf 'one\\ntwo\\n'");
        CommandExecutor::new("group", &spec, &events)
            .run_attempt(1, Duration::from_secs(5), &CancellationToken::new())
            .await;

        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Output { line, stream, .. } = event {
                assert_eq!(stream, OutputStream::Stdout);
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_resolve_env_override_wins() {
        let inherited = vec![
            (OsString::from("A"), OsString::from("base")),
            (OsString::from("B"), OsString::from("base")),
        ];
        let overrides = HashMap::from([("B".to_string(), "override".to_string())]);
        let env = resolve_env(inherited, &overrides);
        assert_eq!(env[&OsString::from("A")], "base");
        assert_eq!(env[&OsString::from("B")], "override");
    }

    #[test]
    fn test_resolve_env_keeps_non_unicode_values() {
        use std::os::unix::ffi::OsStringExt;
        let raw = OsString::from_vec(b"a\xffb".to_vec());
        let inherited = vec![(OsString::from("RAW"), raw.clone())];
        let env = resolve_env(inherited, &HashMap::new());
        assert_eq!(env[&OsString::from("RAW")], raw);
    }

    #[test]
    fn test_child_environment_is_the_full_process_environment() {
        let spec = CommandSpec::new("env", "true").with_env("PAR_RUN_EXTRA", "1");
        let command = tokio::process::Command::from(&spec);
        let envs: BTreeMap<OsString, Option<OsString>> = command
            .as_std()
            .get_envs()
            .map(|(k, v)| (k.to_os_string(), v.map(std::ffi::OsStr::to_os_string)))
            .collect();
        for (key, value) in std::env::vars_os() {
            assert_eq!(envs.get(&key), Some(&Some(value)), "missing {key:?}");
        }
        assert_eq!(
            envs.get(&OsString::from("PAR_RUN_EXTRA")),
            Some(&Some(OsString::from("1")))
        );
    }
}
