// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// Result of running one hook command.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandResult {
    /// `None` when the command was killed on timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run `command` through the platform shell with the given env additions,
/// capturing stdout/stderr, enforcing `timeout` with a two-stage
/// term-then-kill escalation.  `kill_on_drop` guarantees no zombie
/// survives an engine crash mid-await.
pub(crate) async fn run_shell_command(
    command: &str,
    envs: &[(String, String)],
    cwd: &Path,
    timeout: Duration,
) -> anyhow::Result<CommandResult> {
    #[cfg(windows)]
    let mut cmd = {
        let mut c = tokio::process::Command::new("cmd");
        c.arg("/c").arg(command);
        c
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut c = tokio::process::Command::new("/bin/sh");
        c.arg("-c").arg(command);
        c
    };
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (k, v) in envs {
        cmd.env(k, v);
    }

    let mut child = cmd.spawn().context("spawning hook command")?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(out) = stdout_pipe.as_mut() {
            let _ = out.read_to_string(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(err) = stderr_pipe.as_mut() {
            let _ = err.read_to_string(&mut buf).await;
        }
        buf
    });

    let mut timed_out = false;
    let exit_code = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.context("waiting for hook command")?.code(),
        Err(_) => {
            timed_out = true;
            terminate(&mut child).await;
            None
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    Ok(CommandResult { exit_code, stdout, stderr, timed_out })
}

/// Two-stage termination: SIGTERM first so the command can clean up, then
/// SIGKILL after a short grace period.  Windows has no SIGTERM; kill
/// directly.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            let grace = Duration::from_secs(2);
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill timed-out hook command");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_shell_command("echo out; exit 0", &[], dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(r.exit_code, Some(0));
        assert!(r.stdout.contains("out"));
        assert!(!r.timed_out);
    }

    #[tokio::test]
    async fn captures_stderr_and_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_shell_command(
            "echo oops >&2; exit 2",
            &[],
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(r.exit_code, Some(2));
        assert!(r.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn env_additions_are_visible_to_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_shell_command(
            "echo \"$HOOK_EVENT\"",
            &[("HOOK_EVENT".to_string(), "PreToolUse".to_string())],
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(r.stdout.contains("PreToolUse"));
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let start = std::time::Instant::now();
        let r = run_shell_command("sleep 30", &[], dir.path(), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(r.timed_out);
        assert_eq!(r.exit_code, None);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
