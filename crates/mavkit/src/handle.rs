//! Command Handle: the lifecycle object returned by every Vehicle Control
//! Core operation that drives the vehicle toward a goal over time.

use crate::error::VehicleError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::Pending | CommandStatus::Running)
    }
}

/// A single progress value. Numeric, textual, and coordinate-shaped progress
/// fields share one map so every command can expose a uniform `progress()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressValue {
    Number(f64),
    Text(String),
    Coordinate(crate::geometry::Coordinate),
    Bool(bool),
}

pub type Progress = BTreeMap<String, ProgressValue>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_name: String,
    pub status: CommandStatus,
    pub duration: Duration,
    pub details: Progress,
    pub error: Option<String>,
}

/// Driver-side handle. Held by the Vehicle Control Core task that is
/// actually moving the vehicle; not exposed to callers.
pub(crate) struct CommandDriver {
    status_tx: watch::Sender<CommandStatus>,
    progress_tx: watch::Sender<Progress>,
    result_tx: watch::Sender<Option<CommandResult>>,
    cancel_token: CancellationToken,
    execute_cancel_action: Arc<AtomicBool>,
    command_name: String,
    started_at: Instant,
}

impl CommandDriver {
    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn set_running(&self) {
        let _ = self.status_tx.send(CommandStatus::Running);
    }

    pub fn set_progress(&self, progress: Progress) {
        let _ = self.progress_tx.send(progress);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn should_execute_cancel_action(&self) -> bool {
        self.execute_cancel_action.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn finish(&self, status: CommandStatus, details: Progress, error: Option<VehicleError>) {
        let _ = self.status_tx.send(status);
        let result = CommandResult {
            command_name: self.command_name.clone(),
            status,
            duration: self.started_at.elapsed(),
            details,
            error: error.map(|e| e.to_string()),
        };
        let _ = self.result_tx.send(Some(result));
    }

    pub fn complete(&self, details: Progress) {
        self.finish(CommandStatus::Completed, details, None);
    }

    pub fn fail(&self, error: VehicleError, details: Progress) {
        self.finish(CommandStatus::Failed, details, Some(error));
    }

    pub fn time_out(&self, details: Progress) {
        self.finish(CommandStatus::TimedOut, details, Some(VehicleError::Timeout));
    }

    /// Like [`Self::time_out`] but with a command-specific error, e.g.
    /// `GotoTimeout`/`TakeoffTimeout`/`LandingTimeout`.
    pub fn time_out_with(&self, details: Progress, error: VehicleError) {
        self.finish(CommandStatus::TimedOut, details, Some(error));
    }

    pub fn cancelled(&self, details: Progress) {
        self.finish(CommandStatus::Cancelled, details, Some(VehicleError::Cancelled));
    }
}

/// Caller-facing observation and control surface for one in-flight command.
#[derive(Clone)]
pub struct CommandHandle {
    command_name: String,
    started_at: Instant,
    timeout: Duration,
    status_rx: watch::Receiver<CommandStatus>,
    progress_rx: watch::Receiver<Progress>,
    result_rx: watch::Receiver<Option<CommandResult>>,
    cancel_token: CancellationToken,
    execute_cancel_action: Arc<AtomicBool>,
}

pub(crate) fn new_pair(command_name: impl Into<String>, timeout: Duration) -> (CommandDriver, CommandHandle) {
    let command_name = command_name.into();
    let started_at = Instant::now();
    let (status_tx, status_rx) = watch::channel(CommandStatus::Pending);
    let (progress_tx, progress_rx) = watch::channel(Progress::new());
    let (result_tx, result_rx) = watch::channel(None);
    let cancel_token = CancellationToken::new();
    let execute_cancel_action = Arc::new(AtomicBool::new(false));

    let driver = CommandDriver {
        status_tx,
        progress_tx,
        result_tx,
        cancel_token: cancel_token.clone(),
        execute_cancel_action: execute_cancel_action.clone(),
        command_name: command_name.clone(),
        started_at,
    };
    let handle = CommandHandle {
        command_name,
        started_at,
        timeout,
        status_rx,
        progress_rx,
        result_rx,
        cancel_token,
        execute_cancel_action,
    };
    (driver, handle)
}

impl CommandHandle {
    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn status(&self) -> CommandStatus {
        *self.status_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), CommandStatus::Pending | CommandStatus::Running)
    }

    pub fn is_complete(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.status() == CommandStatus::Completed
    }

    pub fn was_cancelled(&self) -> bool {
        self.status() == CommandStatus::Cancelled
    }

    pub fn timed_out(&self) -> bool {
        self.status() == CommandStatus::TimedOut
    }

    pub fn elapsed_time(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn time_remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed_time())
    }

    pub fn progress(&self) -> Progress {
        self.progress_rx.borrow().clone()
    }

    pub fn error(&self) -> Option<String> {
        self.result_rx.borrow().as_ref().and_then(|r| r.error.clone())
    }

    pub fn result(&self) -> Option<CommandResult> {
        self.result_rx.borrow().clone()
    }

    /// Suspend until the command reaches a terminal state, or `timeout` elapses.
    pub async fn wait(&self, timeout: Option<Duration>) -> CommandResult {
        let mut status_rx = self.status_rx.clone();
        let wait_loop = async {
            loop {
                if status_rx.borrow().is_terminal() {
                    break;
                }
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
        };

        if let Some(timeout) = timeout {
            let _ = tokio::time::timeout(timeout, wait_loop).await;
        } else {
            wait_loop.await;
        }

        self.result().unwrap_or(CommandResult {
            command_name: self.command_name.clone(),
            status: self.status(),
            duration: self.elapsed_time(),
            details: self.progress(),
            error: None,
        })
    }

    /// Request cancellation. Idempotent: returns `false` if already terminal.
    pub fn cancel(&self, execute_cancel_action: bool) -> bool {
        if self.is_complete() {
            return false;
        }
        self.execute_cancel_action.store(execute_cancel_action, Ordering::SeqCst);
        self.cancel_token.cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_starts_pending_then_running() {
        let (driver, handle) = new_pair("goto", Duration::from_secs(5));
        assert_eq!(handle.status(), CommandStatus::Pending);
        driver.set_running();
        assert_eq!(handle.status(), CommandStatus::Running);
        assert!(handle.is_running());
    }

    #[tokio::test]
    async fn terminal_state_is_absorbing() {
        let (driver, handle) = new_pair("takeoff", Duration::from_secs(5));
        driver.set_running();
        driver.complete(Progress::new());
        assert!(handle.is_complete());
        assert!(!handle.is_running());
        assert!(handle.succeeded());
        assert!(handle.error().is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (driver, handle) = new_pair("goto", Duration::from_secs(5));
        driver.set_running();
        assert!(handle.cancel(true));
        driver.cancelled(Progress::new());
        assert!(!handle.cancel(true));
        assert!(handle.was_cancelled());
    }

    #[tokio::test]
    async fn wait_resolves_after_completion() {
        let (driver, handle) = new_pair("land", Duration::from_secs(5));
        driver.set_running();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            driver.complete(Progress::new());
        });
        let result = handle.wait(Some(Duration::from_secs(1))).await;
        assert_eq!(result.status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn failed_command_carries_error_text() {
        let (driver, handle) = new_pair("rtl", Duration::from_secs(5));
        driver.set_running();
        driver.fail(VehicleError::Timeout, Progress::new());
        assert!(!handle.succeeded());
        assert!(handle.error().is_some());
    }
}
