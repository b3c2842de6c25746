//! Client-side handle to one ensemble clustering task.
//!
//! A task is configured while `pending`, then driven through its lifecycle by
//! request/acknowledge round trips. Its local status only moves after the
//! server acknowledged without error. Partial results pushed by the server are
//! decoded here and handed to the registered callback.

use crate::connection::Session;
use crate::error::Result;
use pek_core::{
    DecodeError, EarlyTerminator, InitStrategy, MetricGroup, MetricSelection, PartialResult, PerRun, TaskArgs,
    TaskError, TaskId, TaskResult, TaskStatus,
};
use serde_json::{Value, json};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type PartialResultCallback = Arc<dyn Fn(PartialResult) + Send + Sync>;

struct TaskState {
    status: TaskStatus,
    args: TaskArgs,
    /// A completed result arrived before the start was acknowledged.
    completion_seen: bool,
}

struct TaskInner {
    id: TaskId,
    session: Arc<Session>,
    state: Mutex<TaskState>,
    callback: Mutex<Option<PartialResultCallback>>,
}

/// Shared handle to a task. Clones refer to the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.inner.id).field("status", &self.status()).finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Task {
    pub(crate) fn new(id: TaskId, session: Arc<Session>) -> Self {
        let args = TaskArgs::new(id.clone());
        Self {
            inner: Arc::new(TaskInner {
                id,
                session,
                state: Mutex::new(TaskState { status: TaskStatus::Pending, args, completion_seen: false }),
                callback: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        lock(&self.inner.state)
    }

    /// Id generated when the task was created. Results are pushed on this topic.
    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    /// Snapshot of the current configuration record.
    pub fn args(&self) -> TaskArgs {
        self.state().args.clone()
    }

    fn not_pending(&self) -> TaskError {
        TaskError::NotPending { task_id: self.inner.id.clone() }
    }

    fn ensure_configurable(&self) -> TaskResult<()> {
        if self.status().is_configurable() { Ok(()) } else { Err(self.not_pending()) }
    }

    /// Applies one configuration change, checking the status under the same lock.
    fn apply<F>(&self, update: F) -> TaskResult<&Self>
    where
        F: FnOnce(&mut TaskArgs) -> TaskResult<()>,
    {
        let mut state = self.state();
        if !state.status.is_configurable() {
            return Err(self.not_pending());
        }
        update(&mut state.args)?;
        Ok(self)
    }

    // Configuration

    /// Name of the dataset to cluster.
    pub fn data(&self) -> Option<String> {
        self.state().args.data.clone()
    }

    /// Sets the dataset to cluster.
    ///
    /// # Arguments
    /// * `name` - One of the names listed by `Client::dataset_names`
    ///
    /// # Errors
    /// Returns `TaskError::NotPending` once the task has been started.
    pub fn set_data(&self, name: impl Into<String>) -> TaskResult<&Self> {
        let name = name.into();
        self.apply(|args| {
            args.data = Some(name);
            Ok(())
        })
    }

    /// Like [`Task::set_data`], with the name built lazily.
    ///
    /// The producer is not called when the task is no longer pending.
    pub fn set_data_with<F: FnOnce() -> String>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_data(producer())
    }

    /// Number of clusters each run looks for.
    pub fn n_clusters(&self) -> u32 {
        self.state().args.n_clusters
    }

    /// Sets the number of clusters.
    ///
    /// Zero is accepted here and rejected when the task starts.
    ///
    /// # Errors
    /// Returns `TaskError::NotPending` once the task has been started.
    pub fn set_n_clusters(&self, n_clusters: u32) -> TaskResult<&Self> {
        self.apply(|args| {
            args.n_clusters = n_clusters;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_n_clusters`].
    pub fn set_n_clusters_with<F: FnOnce() -> u32>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_n_clusters(producer())
    }

    /// Number of runs in the ensemble.
    pub fn n_runs(&self) -> u32 {
        self.state().args.n_runs
    }

    /// Sets the number of runs.
    ///
    /// Per-run lists (`init`, `max_iter`, `tol`) must have this many entries
    /// by the time the task starts.
    ///
    /// # Errors
    /// Returns `TaskError::NotPending` once the task has been started.
    pub fn set_n_runs(&self, n_runs: u32) -> TaskResult<&Self> {
        self.apply(|args| {
            args.n_runs = n_runs;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_n_runs`].
    pub fn set_n_runs_with<F: FnOnce() -> u32>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_n_runs(producer())
    }

    /// Centroid initialisation, shared or per run.
    pub fn init(&self) -> PerRun<InitStrategy> {
        self.state().args.init.clone()
    }

    /// One strategy for every run, or a `Vec` with one per run.
    pub fn set_init(&self, init: impl Into<PerRun<InitStrategy>>) -> TaskResult<&Self> {
        let init = init.into();
        self.apply(|args| {
            args.init = init;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_init`].
    pub fn set_init_with<F: FnOnce() -> PerRun<InitStrategy>>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_init(producer())
    }

    /// Iteration cap, shared or per run.
    pub fn max_iter(&self) -> PerRun<u32> {
        self.state().args.max_iter.clone()
    }

    /// Sets the iteration cap.
    ///
    /// # Arguments
    /// * `max_iter` - One cap for every run, or a `Vec` with one per run
    ///
    /// # Errors
    /// Returns `TaskError::NotPending` once the task has been started.
    pub fn set_max_iter(&self, max_iter: impl Into<PerRun<u32>>) -> TaskResult<&Self> {
        let max_iter = max_iter.into();
        self.apply(|args| {
            args.max_iter = max_iter;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_max_iter`].
    pub fn set_max_iter_with<F: FnOnce() -> PerRun<u32>>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_max_iter(producer())
    }

    /// Convergence tolerance, shared or per run.
    pub fn tol(&self) -> PerRun<f64> {
        self.state().args.tol.clone()
    }

    /// Sets the convergence tolerance.
    ///
    /// # Arguments
    /// * `tol` - One tolerance for every run, or a `Vec` with one per run
    ///
    /// # Errors
    /// Returns `TaskError::NotPending` once the task has been started.
    pub fn set_tol(&self, tol: impl Into<PerRun<f64>>) -> TaskResult<&Self> {
        let tol = tol.into();
        self.apply(|args| {
            args.tol = tol;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_tol`].
    pub fn set_tol_with<F: FnOnce() -> PerRun<f64>>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_tol(producer())
    }

    /// Seed of the server-side random generator.
    pub fn random_state(&self) -> Option<u64> {
        self.state().args.random_state
    }

    /// Sets the seed. `None` lets the server pick one.
    pub fn set_random_state(&self, seed: impl Into<Option<u64>>) -> TaskResult<&Self> {
        let seed = seed.into();
        self.apply(|args| {
            args.random_state = seed;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_random_state`].
    pub fn set_random_state_with<F: FnOnce() -> Option<u64>>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_random_state(producer())
    }

    /// Minimum seconds between two partial results.
    pub fn freq(&self) -> Option<f64> {
        self.state().args.freq
    }

    /// Sets the minimum delay between results. `None` sends every update.
    pub fn set_freq(&self, freq: impl Into<Option<f64>>) -> TaskResult<&Self> {
        let freq = freq.into();
        self.apply(|args| {
            args.freq = freq;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_freq`].
    pub fn set_freq_with<F: FnOnce() -> Option<f64>>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_freq(producer())
    }

    /// Early terminators sent with the task, if any were set.
    pub fn ets(&self) -> Option<Vec<Arc<EarlyTerminator>>> {
        self.state().args.ets.clone()
    }

    /// Sets the early terminators.
    ///
    /// `None` leaves the current list untouched. A list holding an invalid
    /// terminator is rejected and the current list is kept.
    pub fn set_ets(&self, ets: Option<Vec<Arc<EarlyTerminator>>>) -> TaskResult<&Self> {
        self.apply(|args| {
            let Some(ets) = ets else {
                return Ok(());
            };
            if let Some(bad) = ets.iter().find(|et| !et.is_valid()) {
                return Err(TaskError::InvalidEarlyTermination {
                    task_id: args.task_id.clone(),
                    reason: format!("'{}' is not a valid early terminator", bad.name()),
                });
            }
            args.ets = Some(ets);
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_ets`].
    ///
    /// A producer returning `None` leaves the current list untouched.
    pub fn set_ets_with<F: FnOnce() -> Option<Vec<Arc<EarlyTerminator>>>>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_ets(producer())
    }

    /// Metric selector of one group. `None` means the group is not computed.
    pub fn metrics(&self, group: MetricGroup) -> Option<MetricSelection> {
        self.state().args.metrics(group).clone()
    }

    /// Sets the metric selector of one group.
    ///
    /// # Arguments
    /// * `group` - Which of the six metric groups to change
    /// * `selection` - `MetricSelection::All`, a named subset, or `None` to skip the group
    ///
    /// # Errors
    /// Returns `TaskError::NotPending` once the task has been started.
    pub fn set_metrics(&self, group: MetricGroup, selection: impl Into<Option<MetricSelection>>) -> TaskResult<&Self> {
        let selection = selection.into();
        self.apply(|args| {
            *args.metrics_mut(group) = selection;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_metrics`].
    pub fn set_metrics_with<F: FnOnce() -> Option<MetricSelection>>(
        &self,
        group: MetricGroup,
        producer: F,
    ) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_metrics(group, producer())
    }

    /// Shorthand for `metrics(MetricGroup::LabelsValidation)`.
    pub fn labels_validation_metrics(&self) -> Option<MetricSelection> {
        self.metrics(MetricGroup::LabelsValidation)
    }

    /// Shorthand for `set_metrics(MetricGroup::LabelsValidation, ..)`.
    pub fn set_labels_validation_metrics(&self, selection: impl Into<Option<MetricSelection>>) -> TaskResult<&Self> {
        self.set_metrics(MetricGroup::LabelsValidation, selection)
    }

    /// Shorthand for `metrics(MetricGroup::LabelsComparison)`.
    pub fn labels_comparison_metrics(&self) -> Option<MetricSelection> {
        self.metrics(MetricGroup::LabelsComparison)
    }

    /// Shorthand for `set_metrics(MetricGroup::LabelsComparison, ..)`.
    pub fn set_labels_comparison_metrics(&self, selection: impl Into<Option<MetricSelection>>) -> TaskResult<&Self> {
        self.set_metrics(MetricGroup::LabelsComparison, selection)
    }

    /// Shorthand for `metrics(MetricGroup::LabelsProgression)`.
    pub fn labels_progression_metrics(&self) -> Option<MetricSelection> {
        self.metrics(MetricGroup::LabelsProgression)
    }

    /// Shorthand for `set_metrics(MetricGroup::LabelsProgression, ..)`.
    pub fn set_labels_progression_metrics(&self, selection: impl Into<Option<MetricSelection>>) -> TaskResult<&Self> {
        self.set_metrics(MetricGroup::LabelsProgression, selection)
    }

    /// Shorthand for `metrics(MetricGroup::PartitionsValidation)`.
    pub fn partitions_validation_metrics(&self) -> Option<MetricSelection> {
        self.metrics(MetricGroup::PartitionsValidation)
    }

    /// Shorthand for `set_metrics(MetricGroup::PartitionsValidation, ..)`.
    pub fn set_partitions_validation_metrics(
        &self,
        selection: impl Into<Option<MetricSelection>>,
    ) -> TaskResult<&Self> {
        self.set_metrics(MetricGroup::PartitionsValidation, selection)
    }

    /// Shorthand for `metrics(MetricGroup::PartitionsComparison)`.
    pub fn partitions_comparison_metrics(&self) -> Option<MetricSelection> {
        self.metrics(MetricGroup::PartitionsComparison)
    }

    /// Shorthand for `set_metrics(MetricGroup::PartitionsComparison, ..)`.
    pub fn set_partitions_comparison_metrics(
        &self,
        selection: impl Into<Option<MetricSelection>>,
    ) -> TaskResult<&Self> {
        self.set_metrics(MetricGroup::PartitionsComparison, selection)
    }

    /// Shorthand for `metrics(MetricGroup::PartitionsProgression)`.
    pub fn partitions_progression_metrics(&self) -> Option<MetricSelection> {
        self.metrics(MetricGroup::PartitionsProgression)
    }

    /// Shorthand for `set_metrics(MetricGroup::PartitionsProgression, ..)`.
    pub fn set_partitions_progression_metrics(
        &self,
        selection: impl Into<Option<MetricSelection>>,
    ) -> TaskResult<&Self> {
        self.set_metrics(MetricGroup::PartitionsProgression, selection)
    }

    /// Whether the server aligns centroids across runs.
    pub fn adjust_centroids(&self) -> bool {
        self.state().args.adjust_centroids
    }

    /// Enables or disables centroid alignment across runs.
    pub fn set_adjust_centroids(&self, adjust: bool) -> TaskResult<&Self> {
        self.apply(|args| {
            args.adjust_centroids = adjust;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_adjust_centroids`].
    pub fn set_adjust_centroids_with<F: FnOnce() -> bool>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_adjust_centroids(producer())
    }

    /// Whether the server aligns labels across runs.
    pub fn adjust_labels(&self) -> bool {
        self.state().args.adjust_labels
    }

    /// Enables or disables label alignment across runs.
    pub fn set_adjust_labels(&self, adjust: bool) -> TaskResult<&Self> {
        self.apply(|args| {
            args.adjust_labels = adjust;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_adjust_labels`].
    pub fn set_adjust_labels_with<F: FnOnce() -> bool>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_adjust_labels(producer())
    }

    /// Whether partial results carry the per-run partitions.
    pub fn return_partitions(&self) -> bool {
        self.state().args.return_partitions
    }

    /// Asks the server to include every run's partition in partial results.
    pub fn set_return_partitions(&self, enabled: bool) -> TaskResult<&Self> {
        self.apply(|args| {
            args.return_partitions = enabled;
            Ok(())
        })
    }

    /// Lazy form of [`Task::set_return_partitions`].
    pub fn set_return_partitions_with<F: FnOnce() -> bool>(&self, producer: F) -> TaskResult<&Self> {
        self.ensure_configurable()?;
        self.set_return_partitions(producer())
    }

    // Lifecycle

    fn control_payload(&self) -> Value {
        json!({"clientId": self.inner.session.client_id(), "taskId": self.inner.id.as_str()})
    }

    fn require_status(&self, expected: TaskStatus) -> TaskResult<()> {
        let status = self.status();
        if status == expected {
            return Ok(());
        }
        let task_id = self.inner.id.clone();
        Err(match expected {
            TaskStatus::Pending => TaskError::AlreadyStarted { task_id },
            TaskStatus::Paused => TaskError::NotPaused { task_id },
            _ => TaskError::NotRunning { task_id },
        })
    }

    /// Moves to `to` if the current status allows it.
    ///
    /// A completion pushed while a request was in flight wins over the request.
    fn advance(&self, to: TaskStatus) {
        let mut state = self.state();
        let from = state.status;
        if from.can_transition_to(to) {
            state.status = to;
            debug!(task_id = %self.inner.id, from = %from, to = %to, "Task status changed");
        } else {
            debug!(task_id = %self.inner.id, from = %from, to = %to, "Task status change skipped");
        }
    }

    fn complete(&self) {
        {
            let mut state = self.state();
            if state.status == TaskStatus::Pending {
                state.completion_seen = true;
                debug!(task_id = %self.inner.id, "Completion received before start was acknowledged");
                return;
            }
        }
        self.advance(TaskStatus::Completed);
    }

    /// Sends the configuration to the server and starts the ensemble.
    pub async fn start(&self) -> Result<()> {
        let args = {
            let state = self.state();
            if !state.status.is_configurable() {
                return Err(TaskError::AlreadyStarted { task_id: self.inner.id.clone() }.into());
            }
            state.args.validate()?;
            state.args.clone()
        };

        let mut payload = self.control_payload();
        payload["args"] = serde_json::to_value(&args)?;
        self.inner.session.send("start-task", Some(payload)).await?;

        self.advance(TaskStatus::Running);
        if std::mem::take(&mut self.state().completion_seen) {
            self.advance(TaskStatus::Completed);
        }
        info!(task_id = %self.inner.id, dataset = ?args.data, n_runs = args.n_runs, "Task started");
        Ok(())
    }

    /// Suspends every run.
    ///
    /// # Errors
    /// Returns `TaskError::NotRunning` without contacting the server when the
    /// task is not running, or the server's error if it refuses.
    pub async fn pause(&self) -> Result<()> {
        self.require_status(TaskStatus::Running)?;
        self.inner.session.send("pause-task", Some(self.control_payload())).await?;
        self.advance(TaskStatus::Paused);
        Ok(())
    }

    /// Resumes a paused task.
    ///
    /// # Errors
    /// Returns `TaskError::NotPaused` without contacting the server when the
    /// task is not paused.
    pub async fn resume(&self) -> Result<()> {
        self.require_status(TaskStatus::Paused)?;
        self.inner.session.send("resume-task", Some(self.control_payload())).await?;
        self.advance(TaskStatus::Running);
        Ok(())
    }

    /// Stops every run of the task. The task cannot be used afterwards.
    pub async fn kill(&self) -> Result<()> {
        self.require_status(TaskStatus::Running)?;
        self.inner.session.send("kill-task", Some(self.control_payload())).await?;
        self.advance(TaskStatus::Killed);
        info!(task_id = %self.inner.id, "Task killed");
        Ok(())
    }

    /// Stops one run of the ensemble; the task keeps running.
    pub async fn kill_run(&self, run_id: u64) -> Result<()> {
        self.require_status(TaskStatus::Running)?;
        let mut payload = self.control_payload();
        payload["runId"] = json!(run_id);
        self.inner.session.send("kill-run", Some(payload)).await?;
        debug!(task_id = %self.inner.id, run_id, "Run killed");
        Ok(())
    }

    // Partial results

    /// Registers the partial-result callback, replacing any previous one.
    pub fn on_partial_result<F>(&self, callback: F) -> &Self
    where
        F: Fn(PartialResult) + Send + Sync + 'static,
    {
        *lock(&self.inner.callback) = Some(Arc::new(callback));
        self
    }

    /// Decodes one pushed message and hands it to the callback.
    ///
    /// A result flagged `completed` moves a running or paused task to
    /// `completed` before the callback runs. While the start is still in
    /// flight the completion is held back until the server acknowledges it.
    /// A missing `taskId` is taken to be this task's id.
    pub fn handle_partial_result(&self, raw: &str) -> std::result::Result<(), DecodeError> {
        let result = PartialResult::decode_for(&self.inner.id, raw)?;

        if result.task_id != self.inner.id {
            warn!(task_id = %self.inner.id, result_task_id = %result.task_id, "Partial result names another task");
        }
        if result.is_completed() {
            self.complete();
        }

        let callback = lock(&self.inner.callback).clone();
        match callback {
            Some(callback) => callback(result),
            None => debug!(task_id = %self.inner.id, "No partial result callback, result discarded"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnection;
    use pek_core::DefaultEarlyTerminator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task() -> Task {
        let session = Arc::new(Session::new(Arc::new(MockConnection::new("client-1")), None));
        Task::new(TaskId::from("task-1"), session)
    }

    #[test]
    fn test_defaults() {
        let task = task();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.n_clusters(), 2);
        assert_eq!(task.n_runs(), 4);
        assert_eq!(task.init(), PerRun::All(InitStrategy::KMeansPlusPlus));
        assert_eq!(task.max_iter(), PerRun::All(300));
        assert!(task.adjust_centroids());
        assert!(!task.return_partitions());
        assert_eq!(task.args().task_id, TaskId::from("task-1"));
    }

    #[test]
    fn test_setters_chain() {
        let task = task();
        task.set_data("iris")
            .unwrap()
            .set_n_clusters(3)
            .unwrap()
            .set_n_runs_with(|| 10)
            .unwrap()
            .set_tol(vec![1e-3; 10])
            .unwrap();
        assert_eq!(task.data().as_deref(), Some("iris"));
        assert_eq!(task.n_clusters(), 3);
        assert_eq!(task.n_runs(), 10);
        assert_eq!(task.tol().per_run_len(), Some(10));
    }

    #[test]
    fn test_metric_selectors() {
        let task = task();
        task.set_labels_validation_metrics(MetricSelection::All).unwrap();
        task.set_metrics(MetricGroup::PartitionsComparison, MetricSelection::only(["ARI"])).unwrap();
        assert_eq!(task.metrics(MetricGroup::LabelsValidation), Some(MetricSelection::All));
        assert_eq!(task.partitions_comparison_metrics(), Some(MetricSelection::only(["ARI"])));

        task.set_labels_validation_metrics(None).unwrap();
        assert_eq!(task.labels_validation_metrics(), None);
    }

    #[test]
    fn test_ets_none_leaves_field() {
        let task = task();
        task.set_ets(Some(vec![DefaultEarlyTerminator::FastKill.get()])).unwrap();
        task.set_ets(None).unwrap();
        assert_eq!(task.ets().map(|ets| ets.len()), Some(1));

        task.set_ets(Some(Vec::new())).unwrap();
        assert_eq!(task.ets(), Some(Vec::new()));
    }

    #[test]
    fn test_invalid_et_is_rejected() {
        let task = task();
        task.set_ets(Some(vec![DefaultEarlyTerminator::SlowNotify.get()])).unwrap();

        let bad = Arc::new(EarlyTerminator::notifier("", None));
        let err = task.set_ets(Some(vec![DefaultEarlyTerminator::FastKill.get(), bad])).unwrap_err();
        assert!(matches!(err, TaskError::InvalidEarlyTermination { .. }));

        let ets = task.ets().unwrap();
        assert_eq!(ets.len(), 1);
        assert!(Arc::ptr_eq(&ets[0], &DefaultEarlyTerminator::SlowNotify.get()));
    }

    #[test]
    fn test_producer_not_called_when_not_pending() {
        let task = task();
        task.state().status = TaskStatus::Running;

        let calls = AtomicUsize::new(0);
        let err = task
            .set_n_clusters_with(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                5
            })
            .unwrap_err();
        assert_eq!(err, TaskError::NotPending { task_id: TaskId::from("task-1") });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(task.n_clusters(), 2);
    }

    #[test]
    fn test_partial_result_reaches_callback() {
        let task = task();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        task.on_partial_result(move |result| lock(&sink).push(result.info.iteration));

        task.handle_partial_result(r#"{"info": {"iteration": 1}, "metrics": {}, "taskId": "task-1"}"#).unwrap();
        task.handle_partial_result(r#"{"info": {"iteration": 2, "cost": Infinity}, "taskId": "task-1"}"#).unwrap();
        assert_eq!(*lock(&seen), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_last_callback_wins() {
        let task = task();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        task.on_partial_result(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        })
        .on_partial_result(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        task.handle_partial_result(r#"{"info": {}, "taskId": "task-1"}"#).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_from_running() {
        let task = task();
        task.state().status = TaskStatus::Running;
        task.handle_partial_result(r#"{"info": {"completed": true}, "taskId": "task-1"}"#).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn test_completion_held_while_pending() {
        let task = task();
        task.handle_partial_result(r#"{"info": {"completed": true}, "taskId": "task-1"}"#).unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.state().completion_seen);
    }

    #[tokio::test]
    async fn test_completion_before_start_ack_completes_task() {
        let task = task();
        task.set_data("iris").unwrap();
        task.handle_partial_result(r#"{"info": {"completed": true}}"#).unwrap();

        task.start().await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(!task.state().completion_seen);
    }

    #[test]
    fn test_missing_task_id_defaults_to_own_id() {
        let task = task();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        task.on_partial_result(move |result| *lock(&sink) = Some(result.task_id));

        task.handle_partial_result(r#"{"info": {"id": "upd-1", "iteration": 1}}"#).unwrap();
        assert_eq!(*lock(&seen), Some(TaskId::from("task-1")));
    }

    #[test]
    fn test_malformed_partial_result() {
        let task = task();
        assert!(task.handle_partial_result("{not json").is_err());
        assert!(task.handle_partial_result(r#"{"taskId": "task-1"}"#).is_err());
        assert!(task.handle_partial_result(r#"{"info": {"iteration": "first"}}"#).is_err());
    }
}
