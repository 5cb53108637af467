//! Subprocess sandbox — isolated command execution.
//!
//! Every child runs in its own process group; on timeout the whole group
//! receives SIGKILL and the killer verifies death before returning. The
//! streaming variant merges stderr into stdout, emits periodic progress
//! callbacks, and distinguishes three failure shapes:
//!
//! - rc = −1 — absolute timeout exceeded
//! - rc = −2 — stuck: no output produced within `stuck_timeout`
//! - rc = −3 — stale: output stopped for `stale_timeout` after some was produced
//!
//! With Docker enabled, commands are wrapped in `docker run` with a
//! per-agent UID hashed into `[10000, 60000)` for filesystem isolation.
//! Missing Docker falls back to direct execution with a warning.
//!
//! None of the entry points return `Err` for child failures; errors are
//! reported through the exit code and stderr text.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt as _;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::EngineConfig;

/// Result of a sandboxed command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code; negative for sandbox-level failures.
    pub rc: i32,
    /// Captured stdout (merged output for the streaming variant).
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited cleanly.
    #[must_use]
    pub const fn ok(&self) -> bool {
        self.rc == 0
    }
}

/// Knobs of one streaming run.
#[derive(Debug, Clone)]
pub struct StreamingLimits {
    /// Hard wall-clock cap.
    pub absolute_timeout: Duration,
    /// Progress callback cadence (also the per-read timeout).
    pub progress_interval: Duration,
    /// Abort when no output at all for this long.
    pub stuck_timeout: Duration,
    /// Abort when output stops for this long after some was produced.
    pub stale_timeout: Duration,
}

impl Default for StreamingLimits {
    fn default() -> Self {
        Self {
            absolute_timeout: Duration::from_secs(900),
            progress_interval: Duration::from_secs(30),
            stuck_timeout: Duration::from_secs(180),
            stale_timeout: Duration::from_secs(300),
        }
    }
}

/// Isolated command executor for agent tools and evidence checks.
#[derive(Debug, Clone)]
pub struct Sandbox {
    docker_enabled: bool,
    docker_image: String,
    docker_network: String,
    docker_memory: String,
    docker_cpus: f64,
    default_timeout: Duration,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Sandbox {
    /// Build a sandbox from engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            docker_enabled: config.docker_enabled,
            docker_image: config.docker_image.clone(),
            docker_network: config.docker_network.clone(),
            docker_memory: config.docker_memory.clone(),
            docker_cpus: config.docker_cpus,
            default_timeout: config.sandbox_timeout,
        }
    }

    /// Default command timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run a shell command with a strict timeout.
    ///
    /// Returns `rc = -1` with `stderr = "timeout after <N>s"` on timeout,
    /// and `rc = -1` with the error text on spawn failure. Never errors.
    pub async fn run(
        &self,
        cmd: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
        timeout: Duration,
        agent_id: Option<&str>,
    ) -> CommandOutput {
        let (program, args) = self.wrap_command(cmd, cwd, agent_id);

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        set_process_group(&mut command);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput {
                    rc: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                };
            }
        };
        let pid = child.id();

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => CommandOutput {
                rc: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => CommandOutput {
                rc: -1,
                stdout: String::new(),
                stderr: e.to_string(),
            },
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid).await;
                }
                warn!(cmd = crate::util::truncate(cmd, 80), timeout_s = timeout.as_secs(), "sandbox timeout, process group killed");
                CommandOutput {
                    rc: -1,
                    stdout: String::new(),
                    stderr: format!("timeout after {}s", timeout.as_secs()),
                }
            }
        }
    }

    /// Run an argv with merged output, progress callbacks, and stuck/stale
    /// detection. `on_progress` receives the seconds elapsed and the bytes
    /// of output captured so far at each `progress_interval` tick.
    pub async fn run_streaming(
        &self,
        argv: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
        limits: &StreamingLimits,
        mut on_progress: impl FnMut(u64, usize) + Send,
    ) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput {
                rc: -1,
                stdout: String::new(),
                stderr: "empty argv".to_owned(),
            };
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        set_process_group(&mut command);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput {
                    rc: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                };
            }
        };
        let pid = child.id();

        // Drain stdout and stderr through one channel so stderr is merged
        // into the output stream in arrival order.
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone());
        }
        drop(tx);

        let started = Instant::now();
        let mut last_output = Instant::now();
        let mut produced_any = false;
        let mut output = Vec::new();

        let failure = loop {
            match tokio::time::timeout(limits.progress_interval, rx.recv()).await {
                Ok(Some(chunk)) => {
                    output.extend_from_slice(&chunk);
                    last_output = Instant::now();
                    produced_any = true;
                }
                // Readers done: child closed its pipes, wait for exit below.
                Ok(None) => break None,
                Err(_) => {
                    let elapsed = started.elapsed();
                    on_progress(elapsed.as_secs(), output.len());
                    debug!(elapsed_s = elapsed.as_secs(), bytes = output.len(), "sandbox streaming progress");

                    if elapsed >= limits.absolute_timeout {
                        break Some((-1, "max timeout"));
                    }
                    if !produced_any && last_output.elapsed() >= limits.stuck_timeout {
                        break Some((-2, "stuck: no output"));
                    }
                    if produced_any && last_output.elapsed() >= limits.stale_timeout {
                        break Some((-3, "stale: output stopped"));
                    }
                }
            }
        };

        if let Some((rc, reason)) = failure {
            if let Some(pid) = pid {
                kill_process_group(pid).await;
            }
            warn!(rc, reason, "sandbox streaming aborted");
            return CommandOutput {
                rc,
                stdout: String::from_utf8_lossy(&output).into_owned(),
                stderr: reason.to_owned(),
            };
        }

        let remaining = limits.absolute_timeout.saturating_sub(started.elapsed());
        let rc = match tokio::time::timeout(remaining.max(Duration::from_secs(1)), child.wait())
            .await
        {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(_)) => -1,
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid).await;
                }
                -1
            }
        };

        CommandOutput {
            rc,
            stdout: String::from_utf8_lossy(&output).into_owned(),
            stderr: String::new(),
        }
    }

    /// Wrap a shell command for execution, in Docker when enabled and present.
    ///
    /// Returns `(program, args)`. The Docker timeout buffer is the caller's
    /// concern; the inner command is always `sh -c <cmd>`.
    fn wrap_command(&self, cmd: &str, workspace: &Path, agent_id: Option<&str>) -> (String, Vec<String>) {
        if self.docker_enabled && docker_available() {
            let uid = agent_uid(agent_id.unwrap_or("default"));
            let args = vec![
                "run".to_owned(),
                "--rm".to_owned(),
                "--network".to_owned(),
                self.docker_network.clone(),
                "--memory".to_owned(),
                self.docker_memory.clone(),
                "--cpus".to_owned(),
                format!("{}", self.docker_cpus),
                "-v".to_owned(),
                format!("{}:/workspace", workspace.display()),
                "-w".to_owned(),
                "/workspace".to_owned(),
                "--user".to_owned(),
                uid.to_string(),
                self.docker_image.clone(),
                "sh".to_owned(),
                "-c".to_owned(),
                cmd.to_owned(),
            ];
            return ("docker".to_owned(), args);
        }
        if self.docker_enabled {
            warn!("docker requested but unavailable, falling back to direct execution");
        }
        ("sh".to_owned(), vec!["-c".to_owned(), cmd.to_owned()])
    }
}

fn spawn_reader(
    mut reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    tx: mpsc::Sender<Vec<u8>>,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Deterministic per-agent UID in `[10000, 60000)`.
#[must_use]
pub fn agent_uid(agent_id: &str) -> u32 {
    10_000 + (crate::util::fnv1a(agent_id.as_bytes()) % 50_000) as u32
}

fn docker_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        std::process::Command::new("docker")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

#[cfg(unix)]
fn set_process_group(command: &mut Command) {
    // pgid 0: the child becomes leader of a fresh group, so killpg reaches
    // every descendant.
    command.process_group(0);
}

#[cfg(not(unix))]
fn set_process_group(_command: &mut Command) {}

/// SIGKILL a process group and verify death.
///
/// Retries the signal up to three times, polling `getpgid` five times at
/// 100 ms intervals after each attempt. A group that survives is left for
/// the watchdog.
#[cfg(unix)]
async fn kill_process_group(pid: u32) {
    let pgid = pid as libc::pid_t;
    for attempt in 0..3 {
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let alive = unsafe { libc::getpgid(pgid) } != -1;
            if !alive {
                return;
            }
        }
        debug!(pid, attempt, "process group still alive after SIGKILL");
    }
    warn!(pid, "process group survived kill attempts, leaving for watchdog");
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn run_captures_output_and_rc() {
        let sandbox = Sandbox::default();
        let out = sandbox
            .run("echo hello && exit 3", Path::new("/tmp"), &no_env(), Duration::from_secs(10), None)
            .await;
        assert_eq!(out.rc, 3);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_times_out_and_kills_group() {
        let sandbox = Sandbox::default();
        let start = Instant::now();
        let out = sandbox
            .run("sleep 30", Path::new("/tmp"), &no_env(), Duration::from_secs(1), None)
            .await;
        assert_eq!(out.rc, -1);
        assert_eq!(out.stderr, "timeout after 1s");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn run_reports_spawn_failure_as_rc() {
        let sandbox = Sandbox::default();
        let out = sandbox
            .run(
                "true",
                Path::new("/nonexistent-dir-for-sandbox-test"),
                &no_env(),
                Duration::from_secs(5),
                None,
            )
            .await;
        assert_eq!(out.rc, -1);
        assert!(!out.stderr.is_empty());
    }

    #[tokio::test]
    async fn streaming_merges_stderr() {
        let sandbox = Sandbox::default();
        let argv: Vec<String> = ["sh", "-c", "echo out; echo err 1>&2"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let out = sandbox
            .run_streaming(&argv, Path::new("/tmp"), &no_env(), &StreamingLimits::default(), |_, _| {})
            .await;
        assert_eq!(out.rc, 0);
        assert!(out.stdout.contains("out"));
        assert!(out.stdout.contains("err"));
    }

    #[tokio::test]
    async fn streaming_detects_stuck_process() {
        let sandbox = Sandbox::default();
        let argv: Vec<String> = ["sleep", "60"].iter().map(|s| (*s).to_owned()).collect();
        let limits = StreamingLimits {
            absolute_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(100),
            stuck_timeout: Duration::from_millis(300),
            stale_timeout: Duration::from_secs(30),
        };
        let out = sandbox
            .run_streaming(&argv, Path::new("/tmp"), &no_env(), &limits, |_, _| {})
            .await;
        assert_eq!(out.rc, -2);
    }

    #[test]
    fn uid_hashing_stays_in_range() {
        for id in ["alice", "bob", "cdp-1", ""] {
            let uid = agent_uid(id);
            assert!((10_000..60_000).contains(&uid), "{id} -> {uid}");
        }
        assert_eq!(agent_uid("alice"), agent_uid("alice"));
        assert_ne!(agent_uid("alice"), agent_uid("bob"));
    }
}
