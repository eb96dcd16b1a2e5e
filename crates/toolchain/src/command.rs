//! Typed external-process invocation with a wall-clock bound.

use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("{stage}: failed to spawn {program}: {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{stage}: exited with code {code:?}: {stderr}")]
    NonZeroExit {
        stage: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{stage}: timed out after {after:?}")]
    TimedOut { stage: String, after: Duration },
    #[error("{stage}: {source}")]
    Io {
        stage: String,
        #[source]
        source: io::Error,
    },
}

impl ToolchainError {
    pub fn io(stage: impl Into<String>, source: io::Error) -> Self {
        ToolchainError::Io {
            stage: stage.into(),
            source,
        }
    }
}

/// Result of a finished (or killed) child process.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or on timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Turn a failed run into an error attributed to `stage`.
    pub fn check(self, stage: &str) -> Result<Self, ToolchainError> {
        if self.timed_out {
            return Err(ToolchainError::TimedOut {
                stage: stage.to_string(),
                after: self.elapsed,
            });
        }
        if self.exit_code != Some(0) {
            return Err(ToolchainError::NonZeroExit {
                stage: stage.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            });
        }
        Ok(self)
    }
}

/// Builder for a single external invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, OsString>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag value`.
    pub fn flag(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_env(&self, key: &str) -> Option<&OsString> {
        self.env.get(key)
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run to completion. Only spawn and wait failures are errors; exit
    /// status and timeout are reported in the output.
    pub fn run(&self, stage: &str) -> Result<CommandOutput, ToolchainError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        new_process_group(&mut command);

        debug!(
            stage,
            program = %self.program.display(),
            args = ?self.args,
            timeout = ?self.timeout,
            "spawning external command"
        );

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| ToolchainError::Spawn {
            stage: stage.to_string(),
            program: self.program.display().to_string(),
            source,
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (exit_code, timed_out) = match self.wait(&mut child, start) {
            Ok(result) => result,
            Err(source) => {
                kill_tree(&mut child);
                return Err(ToolchainError::io(stage, source));
            }
        };
        let elapsed = start.elapsed();

        if timed_out {
            // A tool that left its process group may still hold the pipes; leave the
            // readers detached.
            warn!(stage, elapsed = ?elapsed, "external command timed out and was killed");
            return Ok(CommandOutput {
                exit_code,
                stdout: String::new(),
                stderr: String::new(),
                timed_out,
                elapsed,
            });
        }

        Ok(CommandOutput {
            exit_code,
            stdout: join_output(stdout),
            stderr: join_output(stderr),
            timed_out,
            elapsed,
        })
    }

    fn wait(&self, child: &mut Child, start: Instant) -> io::Result<(Option<i32>, bool)> {
        let Some(timeout) = self.timeout else {
            let status = child.wait()?;
            return Ok((status.code(), false));
        };

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok((status.code(), false));
            }
            if start.elapsed() >= timeout {
                kill_tree(child);
                return Ok((None, true));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Kill `child` and every process in its group, then reap it.
fn kill_tree(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

/// Put the child in its own process group, so a timeout takes down
/// everything the tool spawned.
#[cfg(unix)]
fn new_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn new_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group was created by
    // `new_process_group` and its leader has not been reaped yet.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn drain<R>(pipe: Option<R>) -> Option<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
