//! Finite State Machine for install and uninstall runs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    /// Nothing started yet
    Pending,

    /// Inspecting the host
    Probing,

    /// App directory and virtualenv
    Provisioning,

    /// Producing site and unit text
    Rendering,

    /// Site written, enabled and loaded
    ProxyApplied,

    /// Certificate requested, whatever the outcome
    TlsAttempted,

    /// Credentials file in place
    AuthApplied,

    /// Service active
    ServiceRunning,

    /// Install complete
    Done,

    /// Failed before anything was changed
    Failed,

    /// Undoing the steps of this run
    RollingBack,

    /// Rollback finished
    RolledBack,

    /// Removing a deployment
    Uninstalling,

    /// Removal finished
    Uninstalled,
}

impl InstallState {
    /// Terminal states accept no further events
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallState::Done
                | InstallState::Failed
                | InstallState::RolledBack
                | InstallState::Uninstalled
        )
    }

    /// States in which host changes may exist that a failure must undo
    fn has_changes(&self) -> bool {
        matches!(
            self,
            InstallState::Provisioning
                | InstallState::Rendering
                | InstallState::ProxyApplied
                | InstallState::TlsAttempted
                | InstallState::AuthApplied
                | InstallState::ServiceRunning
        )
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallState::Pending => "pending",
            InstallState::Probing => "probing",
            InstallState::Provisioning => "provisioning",
            InstallState::Rendering => "rendering",
            InstallState::ProxyApplied => "proxy applied",
            InstallState::TlsAttempted => "tls attempted",
            InstallState::AuthApplied => "auth applied",
            InstallState::ServiceRunning => "service running",
            InstallState::Done => "done",
            InstallState::Failed => "failed",
            InstallState::RollingBack => "rolling back",
            InstallState::RolledBack => "rolled back",
            InstallState::Uninstalling => "uninstalling",
            InstallState::Uninstalled => "uninstalled",
        };
        f.write_str(s)
    }
}

/// Run event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// Begin an install
    Start,

    /// Probe succeeded
    Probed,

    /// App provisioned
    Provisioned,

    /// Site rendered and applied
    ProxyApplied,

    /// TLS step finished (or skipped)
    TlsFinished,

    /// Auth step finished (or skipped)
    AuthFinished,

    /// Service reported active
    ServiceStarted,

    /// Health check done
    Finish,

    /// A step failed
    Fail(String),

    /// Every rollback action ran
    RollbackFinished,

    /// Begin an uninstall
    Uninstall,

    /// Uninstall finished
    UninstallFinished,
}

/// Install / uninstall FSM
#[derive(Debug, Clone)]
pub struct InstallFsm {
    state: InstallState,
    error: Option<String>,
    history: Vec<InstallState>,
}

impl InstallFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: InstallState::Pending,
            error: None,
            history: vec![InstallState::Pending],
        }
    }

    /// Get current state
    pub fn state(&self) -> InstallState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[InstallState] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: InstallEvent) -> Result<InstallState, String> {
        use InstallEvent as E;
        use InstallState as S;

        let new_state = match (self.state, &event) {
            (S::Pending, E::Start) => S::Probing,
            (S::Pending, E::Uninstall) => S::Uninstalling,

            (S::Probing, E::Probed) => S::Provisioning,
            (S::Provisioning, E::Provisioned) => S::Rendering,
            (S::Rendering, E::ProxyApplied) => S::ProxyApplied,
            (S::ProxyApplied, E::TlsFinished) => S::TlsAttempted,
            (S::TlsAttempted, E::AuthFinished) => S::AuthApplied,
            (S::AuthApplied, E::ServiceStarted) => S::ServiceRunning,
            (S::ServiceRunning, E::Finish) => S::Done,

            // nothing was changed yet
            (S::Pending | S::Probing, E::Fail(err)) => {
                self.error = Some(err.clone());
                S::Failed
            }
            (state, E::Fail(err)) if state.has_changes() => {
                self.error = Some(err.clone());
                S::RollingBack
            }
            (S::RollingBack, E::RollbackFinished) => S::RolledBack,

            (S::Uninstalling, E::UninstallFinished) => S::Uninstalled,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

impl Default for InstallFsm {
    fn default() -> Self {
        Self::new()
    }
}
