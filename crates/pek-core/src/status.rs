//! Task lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created and still configurable; nothing sent to the server yet.
    #[default]
    Pending,
    /// Started on the server and streaming partial results.
    Running,
    /// Paused on the server.
    Paused,
    /// Killed by the caller. Terminal.
    Killed,
    /// Every run finished on the server. Terminal.
    Completed,
}

impl TaskStatus {
    /// Checks if the task can move to the given state.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct state transition rule
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, Self::Paused | Self::Killed | Self::Completed) => true,
            (Self::Paused, Self::Running | Self::Completed) => true,
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Killed | Self::Completed)
    }

    /// Only pending tasks accept configuration changes.
    #[must_use]
    pub const fn is_configurable(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Killed => "killed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
