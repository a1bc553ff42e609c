#![allow(async_fn_in_trait)]

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::RepoError;
use crate::error::RepoResult;

// -----------------------------------------------------------------------------
// Types

/// One external program invocation: argv, working directory and environment
/// overrides. Built per call and thrown away afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

/// Receives stdout one line at a time, without the line terminator.
pub type LineSender = UnboundedSender<String>;

/// Runs invocations and captures their stdout.
#[cfg_attr(test, automock)]
pub trait CommandRunner {
    /// Run to completion and return stdout. When `lines` is given every stdout
    /// line is also sent as soon as it is read.
    async fn run(&self, invocation: &Invocation, lines: Option<LineSender>) -> RepoResult<String>;
}

// -----------------------------------------------------------------------------
// Invocation impl

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Export an empty `PAGER` so the child never waits on a terminal pager.
    pub fn without_pager(self) -> Self {
        self.env("PAGER", "")
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ProcessRunner

/// Real implementation that spawns child processes.
#[derive(Clone, Debug, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation, lines: Option<LineSender>) -> RepoResult<String> {
        let command = invocation.to_string();
        debug!(%command, cwd = ?invocation.cwd, "running command");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| RepoError::Spawn {
            command: command.clone(),
            source,
        })?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RepoError::Io(std::io::Error::other(
                "child process pipes were not captured",
            )));
        };

        // Both pipes are drained together so a full stderr cannot stall the child.
        let collect = async {
            let (out, err) = tokio::try_join!(read_stdout(stdout, lines), read_stderr(stderr))?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status))
        };

        let result = match self.timeout {
            Some(after) => match tokio::time::timeout(after, collect).await {
                Ok(result) => result,
                // The child is killed when dropped.
                Err(_) => return Err(RepoError::Timeout { command, after }),
            },
            None => collect.await,
        };
        let (out, err, status) = result?;

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            debug!(%command, exit_code, stderr = %err.trim_end(), "command failed");
            return Err(RepoError::CommandFailed {
                command,
                exit_code,
                stderr: err,
            });
        }

        Ok(out)
    }
}

async fn read_stdout(
    stream: impl AsyncRead + Unpin,
    lines: Option<LineSender>,
) -> std::io::Result<String> {
    let mut reader = BufReader::new(stream);
    let mut output = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(sender) = &lines {
            // A closed receiver only means nobody is watching any more.
            let _ = sender.send(line.trim_end_matches(['\n', '\r']).to_string());
        }
        output.push_str(&line);
    }
    Ok(output)
}

async fn read_stderr(mut stream: impl AsyncRead + Unpin) -> std::io::Result<String> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    #[test]
    fn test_display() {
        let invocation = Invocation::new("git")
            .args(["log", "--format=%H"])
            .current_dir("/tmp")
            .without_pager();
        insta::assert_snapshot!(invocation, @"git log --format=%H");
        assert_eq!(invocation.env.get("PAGER").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = ProcessRunner::default()
            .run(&sh("printf 'alpha\\nbeta\\n'"), None)
            .await
            .unwrap();
        assert_eq!(out, "alpha\nbeta\n");
    }

    #[tokio::test]
    async fn test_run_streams_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = ProcessRunner::default()
            .run(&sh("printf 'one\\ntwo\\nthree'"), Some(tx))
            .await
            .unwrap();
        assert_eq!(out, "one\ntwo\nthree");

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_run_applies_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        let out = ProcessRunner::default()
            .run(
                &sh("printf '%s|' \"$REPOKIT_TEST\"; ls").current_dir(dir.path()).env("REPOKIT_TEST", "set"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(out, "set|marker\n");
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let err = ProcessRunner::default()
            .run(&sh("echo oops >&2; exit 3"), None)
            .await
            .unwrap_err();
        match err {
            RepoError::CommandFailed {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "sh -c echo oops >&2; exit 3");
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "oops\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let err = ProcessRunner::new(Some(Duration::from_millis(100)))
            .run(&sh("sleep 5"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let err = ProcessRunner::default()
            .run(&Invocation::new("repokit-no-such-program"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Spawn { .. }), "{err:?}");
    }
}
