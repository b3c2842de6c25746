//! Task configuration record.
//!
//! `TaskArgs` is serialised verbatim as the `args` field of the `start-task`
//! request, so the serde names here are the server's field names.

use crate::error::{TaskError, TaskResult};
use crate::et::EarlyTerminator;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Client-generated identifier of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A parameter given either once for every run or once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerRun<T> {
    Each(Vec<T>),
    All(T),
}

impl<T> PerRun<T> {
    /// Number of explicit per-run values, `None` for a shared value.
    #[must_use]
    pub fn per_run_len(&self) -> Option<usize> {
        match self {
            Self::All(_) => None,
            Self::Each(values) => Some(values.len()),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        let slice = match self {
            Self::All(value) => std::slice::from_ref(value),
            Self::Each(values) => values.as_slice(),
        };
        slice.iter()
    }
}

impl<T> From<T> for PerRun<T> {
    fn from(value: T) -> Self {
        Self::All(value)
    }
}

impl<T> From<Vec<T>> for PerRun<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Each(values)
    }
}

/// Centroid initialisation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitStrategy {
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "k-means++")]
    KMeansPlusPlus,
}

impl InitStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::KMeansPlusPlus => "k-means++",
        }
    }
}

impl fmt::Display for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "k-means++" => Ok(Self::KMeansPlusPlus),
            other => Err(format!("invalid init '{other}'. Must be one of [random, k-means++]")),
        }
    }
}

/// Which metrics the server computes for one metric group.
///
/// Names are passed through untouched; the server decides what it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricSelection {
    /// Every metric the server version supports (`"ALL"` on the wire).
    All,
    Only(Vec<String>),
}

const ALL_METRICS: &str = "ALL";

impl MetricSelection {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }
}

impl FromStr for MetricSelection {
    type Err = std::convert::Infallible;

    /// `ALL` or a comma-separated list of metric names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ALL_METRICS {
            return Ok(Self::All);
        }
        Ok(Self::only(s.split(',').map(str::trim).filter(|name| !name.is_empty())))
    }
}

impl Serialize for MetricSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str(ALL_METRICS),
            Self::Only(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MetricSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            Names(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Keyword(word) if word == ALL_METRICS => Ok(Self::All),
            Raw::Keyword(word) => {
                Err(de::Error::custom(format!("expected \"{ALL_METRICS}\" or a list of metric names, got \"{word}\"")))
            }
            Raw::Names(names) => Ok(Self::Only(names)),
        }
    }
}

/// The six metric selectors of a task, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricGroup {
    LabelsValidation,
    LabelsComparison,
    LabelsProgression,
    PartitionsValidation,
    PartitionsComparison,
    PartitionsProgression,
}

impl MetricGroup {
    pub const ALL: [Self; 6] = [
        Self::LabelsValidation,
        Self::LabelsComparison,
        Self::LabelsProgression,
        Self::PartitionsValidation,
        Self::PartitionsComparison,
        Self::PartitionsProgression,
    ];

    /// Field name used in the args record and in partial-result metrics.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::LabelsValidation => "labelsValidationMetrics",
            Self::LabelsComparison => "labelsComparisonMetrics",
            Self::LabelsProgression => "labelsProgressionMetrics",
            Self::PartitionsValidation => "partitionsValidationMetrics",
            Self::PartitionsComparison => "partitionsComparisonMetrics",
            Self::PartitionsProgression => "partitionsProgressionMetrics",
        }
    }
}

/// Full configuration of a clustering task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    #[serde(rename = "taskId")]
    pub task_id: TaskId,
    /// Dataset name.
    pub data: Option<String>,
    pub n_clusters: u32,
    pub n_runs: u32,
    pub init: PerRun<InitStrategy>,
    pub max_iter: PerRun<u32>,
    pub tol: PerRun<f64>,
    pub random_state: Option<u64>,
    /// Minimum seconds between two partial results; `None` means no throttling.
    pub freq: Option<f64>,
    pub ets: Option<Vec<Arc<EarlyTerminator>>>,
    #[serde(rename = "labelsValidationMetrics")]
    pub labels_validation_metrics: Option<MetricSelection>,
    #[serde(rename = "labelsComparisonMetrics")]
    pub labels_comparison_metrics: Option<MetricSelection>,
    #[serde(rename = "labelsProgressionMetrics")]
    pub labels_progression_metrics: Option<MetricSelection>,
    #[serde(rename = "partitionsValidationMetrics")]
    pub partitions_validation_metrics: Option<MetricSelection>,
    #[serde(rename = "partitionsComparisonMetrics")]
    pub partitions_comparison_metrics: Option<MetricSelection>,
    #[serde(rename = "partitionsProgressionMetrics")]
    pub partitions_progression_metrics: Option<MetricSelection>,
    #[serde(rename = "adjustCentroids")]
    pub adjust_centroids: bool,
    #[serde(rename = "adjustLabels")]
    pub adjust_labels: bool,
    #[serde(rename = "returnPartitions")]
    pub return_partitions: bool,
}

impl TaskArgs {
    pub const DEFAULT_N_CLUSTERS: u32 = 2;
    pub const DEFAULT_N_RUNS: u32 = 4;
    pub const DEFAULT_MAX_ITER: u32 = 300;
    pub const DEFAULT_TOL: f64 = 1e-4;

    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            data: None,
            n_clusters: Self::DEFAULT_N_CLUSTERS,
            n_runs: Self::DEFAULT_N_RUNS,
            init: PerRun::All(InitStrategy::KMeansPlusPlus),
            max_iter: PerRun::All(Self::DEFAULT_MAX_ITER),
            tol: PerRun::All(Self::DEFAULT_TOL),
            random_state: None,
            freq: None,
            ets: None,
            labels_validation_metrics: None,
            labels_comparison_metrics: None,
            labels_progression_metrics: None,
            partitions_validation_metrics: None,
            partitions_comparison_metrics: None,
            partitions_progression_metrics: None,
            adjust_centroids: true,
            adjust_labels: true,
            return_partitions: false,
        }
    }

    #[must_use]
    pub const fn metrics(&self, group: MetricGroup) -> &Option<MetricSelection> {
        match group {
            MetricGroup::LabelsValidation => &self.labels_validation_metrics,
            MetricGroup::LabelsComparison => &self.labels_comparison_metrics,
            MetricGroup::LabelsProgression => &self.labels_progression_metrics,
            MetricGroup::PartitionsValidation => &self.partitions_validation_metrics,
            MetricGroup::PartitionsComparison => &self.partitions_comparison_metrics,
            MetricGroup::PartitionsProgression => &self.partitions_progression_metrics,
        }
    }

    pub fn metrics_mut(&mut self, group: MetricGroup) -> &mut Option<MetricSelection> {
        match group {
            MetricGroup::LabelsValidation => &mut self.labels_validation_metrics,
            MetricGroup::LabelsComparison => &mut self.labels_comparison_metrics,
            MetricGroup::LabelsProgression => &mut self.labels_progression_metrics,
            MetricGroup::PartitionsValidation => &mut self.partitions_validation_metrics,
            MetricGroup::PartitionsComparison => &mut self.partitions_comparison_metrics,
            MetricGroup::PartitionsProgression => &mut self.partitions_progression_metrics,
        }
    }

    /// Checks the record before it is sent to the server.
    pub fn validate(&self) -> TaskResult<()> {
        let invalid = |reason: String| TaskError::InvalidArgs { task_id: self.task_id.clone(), reason };

        if self.n_clusters == 0 {
            return Err(invalid("n_clusters must be >= 1".to_string()));
        }
        if self.n_runs == 0 {
            return Err(invalid("n_runs must be >= 1".to_string()));
        }

        let n_runs = self.n_runs as usize;
        for (field, len) in [
            ("init", self.init.per_run_len()),
            ("max_iter", self.max_iter.per_run_len()),
            ("tol", self.tol.per_run_len()),
        ] {
            if let Some(len) = len
                && len != n_runs
            {
                return Err(invalid(format!("{field} has {len} values but n_runs is {n_runs}")));
            }
        }

        if self.max_iter.values().any(|&max_iter| max_iter == 0) {
            return Err(invalid("max_iter must be >= 1".to_string()));
        }
        if self.tol.values().any(|&tol| !tol.is_finite() || tol <= 0.0) {
            return Err(invalid("tol must be a finite value > 0".to_string()));
        }
        if let Some(freq) = self.freq
            && (!freq.is_finite() || freq < 0.0)
        {
            return Err(invalid("freq must be a finite value >= 0".to_string()));
        }
        if let Some(ets) = &self.ets
            && let Some(bad) = ets.iter().find(|et| !et.is_valid())
        {
            return Err(invalid(format!("early terminator '{}' is not valid", bad.name())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::et::DefaultEarlyTerminator;
    use serde_json::json;

    fn args() -> TaskArgs {
        TaskArgs::new(TaskId::from("task-1"))
    }

    #[test]
    fn test_defaults_on_the_wire() {
        let value = serde_json::to_value(args()).unwrap();
        assert_eq!(
            value,
            json!({
                "taskId": "task-1",
                "data": null,
                "n_clusters": 2,
                "n_runs": 4,
                "init": "k-means++",
                "max_iter": 300,
                "tol": 1e-4,
                "random_state": null,
                "freq": null,
                "ets": null,
                "labelsValidationMetrics": null,
                "labelsComparisonMetrics": null,
                "labelsProgressionMetrics": null,
                "partitionsValidationMetrics": null,
                "partitionsComparisonMetrics": null,
                "partitionsProgressionMetrics": null,
                "adjustCentroids": true,
                "adjustLabels": true,
                "returnPartitions": false
            })
        );
    }

    #[test]
    fn test_per_run_and_selection_encoding() {
        let mut args = args();
        args.n_runs = 2;
        args.init = vec![InitStrategy::Random, InitStrategy::KMeansPlusPlus].into();
        args.labels_validation_metrics = Some(MetricSelection::All);
        args.partitions_comparison_metrics = Some(MetricSelection::only(["ari", "ami"]));
        args.ets = Some(vec![DefaultEarlyTerminator::FastKill.get()]);

        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["init"], json!(["random", "k-means++"]));
        assert_eq!(value["labelsValidationMetrics"], json!("ALL"));
        assert_eq!(value["partitionsComparisonMetrics"], json!(["ari", "ami"]));
        assert_eq!(value["ets"], json!([{"name": "fast-kill", "threshold": null, "action": "kill"}]));

        let back: TaskArgs = serde_json::from_value(value).unwrap();
        assert_eq!(back, args);
    }

    #[test]
    fn test_metric_selection_rejects_other_keywords() {
        assert!(serde_json::from_value::<MetricSelection>(json!("SOME")).is_err());
        assert_eq!("ALL".parse::<MetricSelection>().unwrap(), MetricSelection::All);
        assert_eq!(
            "silhouette, ch".parse::<MetricSelection>().unwrap(),
            MetricSelection::only(["silhouette", "ch"])
        );
    }

    #[test]
    fn test_metric_group_accessors() {
        let mut args = args();
        *args.metrics_mut(MetricGroup::PartitionsProgression) = Some(MetricSelection::All);
        assert_eq!(args.partitions_progression_metrics, Some(MetricSelection::All));
        assert_eq!(args.metrics(MetricGroup::PartitionsProgression), &Some(MetricSelection::All));
        assert_eq!(args.metrics(MetricGroup::LabelsValidation), &None);
    }

    #[test]
    fn test_validate_defaults() {
        assert!(args().validate().is_ok());
    }

    #[test]
    fn test_validate_per_run_length() {
        let mut args = args();
        args.n_runs = 3;
        args.max_iter = vec![100, 200].into();
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("max_iter has 2 values but n_runs is 3"));

        args.max_iter = vec![100, 200, 300].into();
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_scalars() {
        let mut zero_clusters = args();
        zero_clusters.n_clusters = 0;
        assert!(zero_clusters.validate().is_err());

        let mut bad_tol = args();
        bad_tol.tol = PerRun::All(-1.0);
        assert!(bad_tol.validate().is_err());

        let mut bad_freq = args();
        bad_freq.freq = Some(f64::INFINITY);
        assert!(bad_freq.validate().is_err());

        let mut bad_et = args();
        bad_et.ets = Some(vec![Arc::new(EarlyTerminator::killer("", None))]);
        assert!(bad_et.validate().is_err());
    }
}
