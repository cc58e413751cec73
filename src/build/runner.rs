//! Generator process execution.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, warn};

use super::command::GeneratorCommand;
use super::error::{BuildError, BuildResult};

/// Runs one generator invocation and classifies the outcome.
///
/// Implementations must stop the underlying work when the returned future is
/// dropped before completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Returns the generator's stdout on success.
    async fn run(&self, command: &GeneratorCommand) -> BuildResult<Vec<u8>>;
}

/// Spawns the generator as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    timeout: Option<Duration>,
}

impl SubprocessRunner {
    pub fn new() -> Self {
        Self {
            timeout: Some(Duration::from_secs(300)),
        }
    }

    /// `None` lets a build run for as long as it takes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SubprocessRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Tears down the generator's process group when a started process is
/// dropped before it reported back.
///
/// The generator leads its own group, so launchers such as `xvfb-run` that
/// fork the real generator are killed together with it.
struct ChildTeardown {
    pid: Option<u32>,
    program: String,
    armed: bool,
}

impl Drop for ChildTeardown {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                pid = ?self.pid,
                program = %self.program,
                "Generator process terminated before completion"
            );
            if let Some(pid) = self.pid {
                kill_process_group(pid);
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: killpg takes no pointers; a stale group id only yields ESRCH.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!("killpg({}) failed: {}", pid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(&self, command: &GeneratorCommand) -> BuildResult<Vec<u8>> {
        debug!("Running generator: {}", command);
        let started = Instant::now();

        // kill_on_drop covers cancellation, timeouts and I/O faults alike:
        // whichever path drops the child kills it. ChildTeardown reaches
        // anything it forked.
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| {
                error!("Failed to start generator '{}': {}", command.program.display(), e);
                BuildError::infrastructure(format!(
                    "could not start '{}': {}",
                    command.program.display(),
                    e
                ))
            })?;

        let mut teardown = ChildTeardown {
            pid: child.id(),
            program: command.program.display().to_string(),
            armed: true,
        };

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    error!("Generator timed out after {:?}: {}", limit, command);
                    return Err(BuildError::infrastructure(format!(
                        "generator timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => child.wait_with_output().await,
        };

        let output = match waited {
            Ok(output) => output,
            Err(e) => {
                error!("Lost contact with generator process: {}", e);
                return Err(BuildError::infrastructure(format!(
                    "generator communication failed: {}",
                    e
                )));
            }
        };
        teardown.armed = false;

        if output.status.success() {
            debug!(
                "Generator finished in {:?} ({} bytes)",
                started.elapsed(),
                output.stdout.len()
            );
            return Ok(output.stdout);
        }

        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        warn!(
            exit_code = ?output.status.code(),
            "Generator build failed: {}",
            diagnostics.trim()
        );
        Err(BuildError::Generation {
            exit_code: output.status.code(),
            diagnostics: Arc::from(diagnostics),
        })
    }
}
