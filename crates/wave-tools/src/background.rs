// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Background task manager.
//!
//! Tasks outlive the turn that spawned them.  A terminal transition
//! (completed / failed / killed) is reported on the completion channel so
//! the turn controller can synthesise a `TaskOutput` round while idle.
//! Turn abort never cancels background tasks; only [`BackgroundTasks::kill`]
//! does.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Shell,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub session_id: String,
}

/// Cheap clonable handle to the per-agent task table.
#[derive(Clone)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<HashMap<String, BackgroundTask>>>,
    kill_tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
    completed_tx: mpsc::UnboundedSender<String>,
}

impl BackgroundTasks {
    /// Build the manager plus the receiver for terminal-transition
    /// notifications (consumed by the turn controller's idle listener).
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tasks: Arc::new(Mutex::new(HashMap::new())),
                kill_tokens: Arc::new(Mutex::new(HashMap::new())),
                completed_tx: tx,
            },
            rx,
        )
    }

    pub fn get(&self, id: &str) -> Option<BackgroundTask> {
        self.tasks.lock().expect("task table poisoned").get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<BackgroundTask> {
        let mut tasks: Vec<BackgroundTask> = self
            .tasks
            .lock()
            .expect("task table poisoned")
            .values()
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// Spawn a shell command as a background task and return its id
    /// immediately.  Output accumulates into the task record while the
    /// process runs.
    pub fn spawn_shell(
        &self,
        command: &str,
        workdir: &Path,
        session_id: &str,
    ) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        let task = BackgroundTask {
            id: id.clone(),
            kind: TaskKind::Shell,
            status: TaskStatus::Running,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            session_id: session_id.to_string(),
        };
        self.tasks
            .lock()
            .expect("task table poisoned")
            .insert(id.clone(), task);

        let kill = CancellationToken::new();
        self.kill_tokens
            .lock()
            .expect("kill table poisoned")
            .insert(id.clone(), kill.clone());

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
        cmd.current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let manager = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            // Readers drain the pipes into the live task record so that
            // TaskOutput can report partial output while the task runs.
            let out_manager = manager.clone();
            let out_id = task_id.clone();
            let out_reader = tokio::spawn(async move {
                if let Some(out) = stdout.as_mut() {
                    let mut buf = [0u8; 4096];
                    while let Ok(n) = out.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        out_manager.append_output(&out_id, &buf[..n], false);
                    }
                }
            });
            let err_manager = manager.clone();
            let err_id = task_id.clone();
            let err_reader = tokio::spawn(async move {
                if let Some(err) = stderr.as_mut() {
                    let mut buf = [0u8; 4096];
                    while let Ok(n) = err.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        err_manager.append_output(&err_id, &buf[..n], true);
                    }
                }
            });

            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = kill.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        warn!(task_id = %task_id, error = %e, "failed to kill background task");
                    }
                    let _ = child.wait().await;
                    None
                }
            };
            let _ = out_reader.await;
            let _ = err_reader.await;

            let (final_status, exit_code) = match status {
                Some(s) => {
                    let code = s.code();
                    if s.success() {
                        (TaskStatus::Completed, code)
                    } else {
                        (TaskStatus::Failed, code)
                    }
                }
                None => (TaskStatus::Killed, None),
            };
            manager.finish(&task_id, final_status, exit_code);
        });

        debug!(task_id = %id, command, "spawned background shell task");
        Ok(id)
    }

    /// Register a non-process task (e.g. long-running tool work) as
    /// running.  The owner later reports completion via [`Self::finish`].
    pub fn insert_running(&self, kind: TaskKind, session_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.tasks.lock().expect("task table poisoned").insert(
            id.clone(),
            BackgroundTask {
                id: id.clone(),
                kind,
                status: TaskStatus::Running,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                session_id: session_id.to_string(),
            },
        );
        id
    }

    /// Transition a task to a terminal state and notify the listener.
    pub fn finish(&self, id: &str, status: TaskStatus, exit_code: Option<i32>) {
        {
            let mut tasks = self.tasks.lock().expect("task table poisoned");
            let Some(task) = tasks.get_mut(id) else { return };
            if task.status.is_terminal() {
                return;
            }
            task.status = status;
            task.exit_code = exit_code;
        }
        self.kill_tokens.lock().expect("kill table poisoned").remove(id);
        let _ = self.completed_tx.send(id.to_string());
    }

    fn append_output(&self, id: &str, bytes: &[u8], is_stderr: bool) {
        let mut tasks = self.tasks.lock().expect("task table poisoned");
        if let Some(task) = tasks.get_mut(id) {
            let buf = if is_stderr { &mut task.stderr } else { &mut task.stdout };
            buf.push_str(&String::from_utf8_lossy(bytes));
        }
    }

    /// Explicitly kill a running task.  Returns false for unknown or
    /// already-terminal tasks.
    pub fn kill(&self, id: &str) -> bool {
        let token = self.kill_tokens.lock().expect("kill table poisoned").get(id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => {
                // Non-process task: transition directly.
                let known_running = self
                    .get(id)
                    .map(|t| !t.status.is_terminal())
                    .unwrap_or(false);
                if known_running {
                    self.finish(id, TaskStatus::Killed, None);
                }
                known_running
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
