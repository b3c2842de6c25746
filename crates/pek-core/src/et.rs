//! Early-termination rules.
//!
//! An early terminator names a server-side stopping condition and the action the
//! server takes when it fires. The process-wide default catalog is built once and
//! shared by reference between tasks.

use crate::error::EarlyTerminationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// What the server does when a terminator fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyTerminationAction {
    /// Report the condition in the partial results.
    Notify,
    /// Kill the run that met the condition.
    Kill,
}

impl EarlyTerminationAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::Kill => "kill",
        }
    }
}

impl fmt::Display for EarlyTerminationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EarlyTerminationAction {
    type Err = EarlyTerminationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notify" => Ok(Self::Notify),
            "kill" => Ok(Self::Kill),
            other => Err(EarlyTerminationError::InvalidAction { action: other.to_string() }),
        }
    }
}

/// A named stopping rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEarlyTerminator")]
pub struct EarlyTerminator {
    name: String,
    threshold: Option<f64>,
    action: Option<EarlyTerminationAction>,
}

#[derive(Deserialize)]
struct RawEarlyTerminator {
    name: String,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    action: Option<String>,
}

impl TryFrom<RawEarlyTerminator> for EarlyTerminator {
    type Error = EarlyTerminationError;

    fn try_from(raw: RawEarlyTerminator) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.threshold, raw.action.as_deref())
    }
}

impl EarlyTerminator {
    /// Builds a terminator from a textual action.
    ///
    /// `action` must be absent, `"notify"` or `"kill"`.
    pub fn new(
        name: impl Into<String>,
        threshold: Option<f64>,
        action: Option<&str>,
    ) -> Result<Self, EarlyTerminationError> {
        let action = action.map(str::parse).transpose()?;
        Ok(Self { name: name.into(), threshold, action })
    }

    #[must_use]
    pub fn notifier(name: impl Into<String>, threshold: Option<f64>) -> Self {
        Self { name: name.into(), threshold, action: Some(EarlyTerminationAction::Notify) }
    }

    #[must_use]
    pub fn killer(name: impl Into<String>, threshold: Option<f64>) -> Self {
        Self { name: name.into(), threshold, action: Some(EarlyTerminationAction::Kill) }
    }

    /// A terminator with no action. The server evaluates nothing for it.
    #[must_use]
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self { name: name.into(), threshold: None, action: None }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    #[must_use]
    pub const fn action(&self) -> Option<EarlyTerminationAction> {
        self.action
    }

    /// Whether the terminator can be sent to the server as part of a task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && self.threshold.is_none_or(f64::is_finite)
    }
}

/// Entries of the default catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultEarlyTerminator {
    FastNotify,
    SlowNotify,
    FastKill,
    SlowKill,
}

struct Catalog {
    fast_notify: Arc<EarlyTerminator>,
    slow_notify: Arc<EarlyTerminator>,
    fast_kill: Arc<EarlyTerminator>,
    slow_kill: Arc<EarlyTerminator>,
}

static CATALOG: LazyLock<Catalog> = LazyLock::new(|| Catalog {
    fast_notify: Arc::new(EarlyTerminator::notifier("fast-notify", None)),
    slow_notify: Arc::new(EarlyTerminator::notifier("slow-notify", None)),
    fast_kill: Arc::new(EarlyTerminator::killer("fast-kill", None)),
    slow_kill: Arc::new(EarlyTerminator::killer("slow-kill", None)),
});

impl DefaultEarlyTerminator {
    pub const ALL: [Self; 4] = [Self::FastNotify, Self::SlowNotify, Self::FastKill, Self::SlowKill];

    /// Shared reference to the catalog entry.
    #[must_use]
    pub fn get(self) -> Arc<EarlyTerminator> {
        let catalog = &*CATALOG;
        let entry = match self {
            Self::FastNotify => &catalog.fast_notify,
            Self::SlowNotify => &catalog.slow_notify,
            Self::FastKill => &catalog.fast_kill,
            Self::SlowKill => &catalog.slow_kill,
        };
        Arc::clone(entry)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FastNotify => "fast-notify",
            Self::SlowNotify => "slow-notify",
            Self::FastKill => "fast-kill",
            Self::SlowKill => "slow-kill",
        }
    }

    /// The whole catalog, in declaration order.
    #[must_use]
    pub fn all() -> Vec<Arc<EarlyTerminator>> {
        Self::ALL.iter().map(|entry| entry.get()).collect()
    }
}

impl FromStr for DefaultEarlyTerminator {
    type Err = EarlyTerminationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|entry| entry.name() == s).ok_or_else(|| {
            let names: Vec<&str> = Self::ALL.iter().map(|entry| entry.name()).collect();
            EarlyTerminationError::UnknownCatalogEntry { name: s.to_string(), allowed: names.join(", ") }
        })
    }
}
