//! Decoding of streamed partial results.
//!
//! The server encodes non-finite floats as the bare tokens `Infinity`,
//! `-Infinity` and `NaN`, which are not JSON. They are rewritten to `null`
//! before parsing. Keys the client does not know about are kept in the `extra`
//! map of the block they appeared in.

use crate::args::TaskId;
use crate::error::DecodeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeSet;

const NON_FINITE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Rewrites non-finite number tokens to `null`. String literals are left alone.
pub fn normalize_non_finite(raw: &str) -> Cow<'_, str> {
    if !raw.contains("Infinity") && !raw.contains("NaN") {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(tail) = NON_FINITE_TOKENS.iter().find_map(|token| rest.strip_prefix(token)) {
            out.push_str("null");
            rest = tail;
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    Cow::Owned(out)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One streamed update of a running ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    pub info: PartialResultInfo,
    #[serde(default)]
    pub early_termination: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metrics: PartialResultMetrics,
    #[serde(default)]
    pub centroids: Option<Value>,
    #[serde(default)]
    pub labels: Option<Value>,
    /// Only sent when the task was started with `returnPartitions`.
    #[serde(default)]
    pub partitions: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub runs_status: RunsStatus,
    pub task_id: TaskId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PartialResult {
    /// Decodes one raw message as received from the connection.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let normalized = normalize_non_finite(raw);
        Ok(serde_json::from_str(&normalized)?)
    }

    /// Decodes a message that was pushed on the topic of `task_id`.
    ///
    /// The topic stands in for `taskId` when the payload leaves it out or sends `null`.
    pub fn decode_for(task_id: &TaskId, raw: &str) -> Result<Self, DecodeError> {
        let normalized = normalize_non_finite(raw);
        let mut value: Value = serde_json::from_str(&normalized)?;
        if let Value::Object(fields) = &mut value {
            let entry = fields.entry("taskId").or_insert(Value::Null);
            if entry.is_null() {
                *entry = Value::String(task_id.as_str().to_string());
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// True once the server reports that every run has finished.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.info.completed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResultInfo {
    /// Update identifier, passed through as sent.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub iteration: Option<u64>,
    /// A single seed or one seed per run.
    #[serde(default)]
    pub seed: Option<Value>,
    /// Last update the server will send for this task.
    #[serde(default, deserialize_with = "null_as_default")]
    pub last: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed: bool,
    #[serde(default)]
    pub cost: Option<f64>,
    /// Index of the best run so far.
    #[serde(default)]
    pub best_run: Option<u64>,
    #[serde(default)]
    pub inertia: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metric results, grouped like the six metric selectors of the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResultMetrics {
    #[serde(default)]
    pub labels_validation_metrics: Option<Value>,
    #[serde(default)]
    pub labels_comparison_metrics: Option<Value>,
    #[serde(default)]
    pub labels_progression_metrics: Option<Value>,
    #[serde(default)]
    pub partitions_validation_metrics: Option<Value>,
    #[serde(default)]
    pub partitions_comparison_metrics: Option<Value>,
    #[serde(default)]
    pub partitions_progression_metrics: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-run progress of the ensemble.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunsStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub run_iteration: Vec<Option<u64>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub run_completed: Vec<bool>,
    /// Ids of the killed runs. A non-finite id decodes to `None`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub runs_killed: Vec<Option<u64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunsStatus {
    /// True if the server reported `run_id` as killed.
    #[must_use]
    pub fn is_run_killed(&self, run_id: u64) -> bool {
        self.runs_killed.contains(&Some(run_id))
    }

    /// Killed run ids in ascending order, without duplicates or unknown ids.
    #[must_use]
    pub fn killed_runs(&self) -> BTreeSet<u64> {
        self.runs_killed.iter().flatten().copied().collect()
    }
}
