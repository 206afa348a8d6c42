use crate::domain::instance::{WorkflowInstance, WorkflowStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default number of finished instances retained in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Bounded ring of finished workflow instances.
///
/// Optionally mirrored to a JSON-array file holding the most recent N
/// snapshots, read back at engine construction for process-restart
/// visibility. The file is advisory: write failures are logged and never
/// fail the run, and no in-flight instance survives a restart.
pub struct HistoryStore {
    entries: Mutex<VecDeque<WorkflowInstance>>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl HistoryStore {
    /// Create an in-memory store with the given capacity
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            path: None,
        }
    }

    /// Create a file-mirrored store, seeding memory from the file if it
    /// exists and parses
    pub async fn with_file(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let mut entries: VecDeque<WorkflowInstance> = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<WorkflowInstance>>(&bytes) {
                Ok(snapshots) => {
                    debug!(
                        path = %path.display(),
                        entries = snapshots.len(),
                        "Seeded workflow history from file"
                    );
                    snapshots.into()
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "History file unreadable, starting empty"
                    );
                    VecDeque::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "Failed to read history file, starting empty"
                );
                VecDeque::new()
            }
        };

        while entries.len() > capacity {
            entries.pop_front();
        }

        Self {
            entries: Mutex::new(entries),
            capacity,
            path: Some(path),
        }
    }

    /// Append a finished instance, evicting the oldest beyond capacity and
    /// mirroring to the file when one is configured
    pub async fn append(&self, instance: WorkflowInstance) {
        let mut entries = self.entries.lock().await;
        entries.push_back(instance);
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        if let Some(path) = &self.path {
            let snapshots: Vec<&WorkflowInstance> = entries.iter().collect();
            match serde_json::to_vec_pretty(&snapshots) {
                Ok(bytes) => {
                    if let Err(error) = tokio::fs::write(path, bytes).await {
                        warn!(
                            path = %path.display(),
                            error = %error,
                            "Failed to mirror history to file"
                        );
                    }
                }
                Err(error) => {
                    warn!(error = %error, "Failed to serialize history");
                }
            }
        }
    }

    /// Filtered view over history, most recent first
    pub async fn query(
        &self,
        workflow: Option<&str>,
        status: Option<WorkflowStatus>,
        limit: usize,
    ) -> Vec<WorkflowInstance> {
        self.entries
            .lock()
            .await
            .iter()
            .rev()
            .filter(|instance| workflow.map(|w| instance.workflow == w).unwrap_or(true))
            .filter(|instance| status.map(|s| instance.status == s).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of retained instances
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether history is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Aggregated execution counters for one workflow name (or overall)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    /// Total finished executions
    pub executions: u64,

    /// Executions that completed
    pub completed: u64,

    /// Executions that failed
    pub failed: u64,

    /// Executions that hit the overall deadline
    pub timed_out: u64,

    /// Mean wall-clock duration in seconds across finished executions
    pub mean_duration_secs: f64,
}

/// Aggregate metrics snapshot returned by the engine's dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    /// Total finished executions across all workflows
    pub executions: u64,

    /// Completions across all workflows
    pub completed: u64,

    /// Failures across all workflows
    pub failed: u64,

    /// Timeouts across all workflows
    pub timed_out: u64,

    /// Instances currently mid-execution
    pub active: usize,

    /// Mean wall-clock duration in seconds across all workflows
    pub mean_duration_secs: f64,

    /// Per-workflow breakdown keyed by definition name
    pub workflows: HashMap<String, WorkflowStats>,
}

#[derive(Debug, Clone, Default)]
struct StatBucket {
    executions: u64,
    completed: u64,
    failed: u64,
    timed_out: u64,
    total_duration: Duration,
}

impl StatBucket {
    fn record(&mut self, status: WorkflowStatus, duration: Duration) {
        self.executions += 1;
        self.total_duration += duration;
        match status {
            WorkflowStatus::Completed => self.completed += 1,
            WorkflowStatus::TimedOut => self.timed_out += 1,
            _ => self.failed += 1,
        }
    }

    fn view(&self) -> WorkflowStats {
        let mean = if self.executions > 0 {
            self.total_duration.as_secs_f64() / self.executions as f64
        } else {
            0.0
        };
        WorkflowStats {
            executions: self.executions,
            completed: self.completed,
            failed: self.failed,
            timed_out: self.timed_out,
            mean_duration_secs: mean,
        }
    }
}

/// Running counters behind the engine's dashboard
#[derive(Debug, Default)]
pub(crate) struct EngineMetrics {
    overall: StatBucket,
    per_workflow: HashMap<String, StatBucket>,
}

impl EngineMetrics {
    /// Fold one finished instance into the counters
    pub(crate) fn record(&mut self, instance: &WorkflowInstance) {
        let duration = instance.duration().unwrap_or(Duration::ZERO);
        self.overall.record(instance.status, duration);
        self.per_workflow
            .entry(instance.workflow.clone())
            .or_default()
            .record(instance.status, duration);
    }

    /// Snapshot the counters into a dashboard
    pub(crate) fn dashboard(&self, active: usize) -> Dashboard {
        let overall = self.overall.view();
        Dashboard {
            executions: overall.executions,
            completed: overall.completed,
            failed: overall.failed,
            timed_out: overall.timed_out,
            active,
            mean_duration_secs: overall.mean_duration_secs,
            workflows: self
                .per_workflow
                .iter()
                .map(|(name, bucket)| (name.clone(), bucket.view()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Context;

    fn finished(workflow: &str, status: WorkflowStatus, secs: i64) -> WorkflowInstance {
        let mut instance = WorkflowInstance::new(workflow, "1.0.0", Context::new(), None);
        instance.start();
        match status {
            WorkflowStatus::Completed => instance.complete(),
            WorkflowStatus::TimedOut => instance.time_out("deadline exceeded".to_string()),
            _ => instance.fail("boom".to_string()),
        }
        instance.completed_at = Some(instance.created_at + chrono::Duration::seconds(secs));
        instance
    }

    #[tokio::test]
    async fn test_history_evicts_beyond_capacity() {
        let store = HistoryStore::in_memory(3);
        for i in 0..5 {
            let mut instance = finished("wf", WorkflowStatus::Completed, 1);
            instance.correlation_id = format!("run-{}", i);
            store.append(instance).await;
        }

        assert_eq!(store.len().await, 3);
        let entries = store.query(None, None, 10).await;
        // most recent first, oldest two evicted
        assert_eq!(entries[0].correlation_id, "run-4");
        assert_eq!(entries[2].correlation_id, "run-2");
    }

    #[tokio::test]
    async fn test_history_filters() {
        let store = HistoryStore::in_memory(10);
        store.append(finished("billing", WorkflowStatus::Completed, 1)).await;
        store.append(finished("billing", WorkflowStatus::Failed, 1)).await;
        store.append(finished("reports", WorkflowStatus::Completed, 1)).await;

        assert_eq!(store.query(Some("billing"), None, 10).await.len(), 2);
        assert_eq!(
            store
                .query(Some("billing"), Some(WorkflowStatus::Failed), 10)
                .await
                .len(),
            1
        );
        assert_eq!(
            store
                .query(None, Some(WorkflowStatus::Completed), 10)
                .await
                .len(),
            2
        );
        assert_eq!(store.query(None, None, 2).await.len(), 2);
        assert!(store
            .query(Some("unknown"), None, 10)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_history_file_mirror_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        {
            let store = HistoryStore::with_file(&path, 10).await;
            assert!(store.is_empty().await);
            store.append(finished("billing", WorkflowStatus::Completed, 1)).await;
            store.append(finished("billing", WorkflowStatus::Failed, 2)).await;
        }

        // a new store seeds from the mirror file
        let reloaded = HistoryStore::with_file(&path, 10).await;
        assert_eq!(reloaded.len().await, 2);
        let entries = reloaded.query(None, None, 10).await;
        assert_eq!(entries[0].status, WorkflowStatus::Failed);
        assert_eq!(entries[1].status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_history_file_reload_respects_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        {
            let store = HistoryStore::with_file(&path, 10).await;
            for _ in 0..5 {
                store.append(finished("wf", WorkflowStatus::Completed, 1)).await;
            }
        }

        let reloaded = HistoryStore::with_file(&path, 2).await;
        assert_eq!(reloaded.len().await, 2);
    }

    #[tokio::test]
    async fn test_corrupt_history_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = HistoryStore::with_file(&path, 10).await;
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_metrics_aggregation() {
        let mut metrics = EngineMetrics::default();
        metrics.record(&finished("billing", WorkflowStatus::Completed, 2));
        metrics.record(&finished("billing", WorkflowStatus::Failed, 4));
        metrics.record(&finished("reports", WorkflowStatus::TimedOut, 6));

        let dashboard = metrics.dashboard(1);
        assert_eq!(dashboard.executions, 3);
        assert_eq!(dashboard.completed, 1);
        assert_eq!(dashboard.failed, 1);
        assert_eq!(dashboard.timed_out, 1);
        assert_eq!(dashboard.active, 1);
        assert!((dashboard.mean_duration_secs - 4.0).abs() < 1e-9);

        let billing = &dashboard.workflows["billing"];
        assert_eq!(billing.executions, 2);
        assert_eq!(billing.completed, 1);
        assert_eq!(billing.failed, 1);
        assert!((billing.mean_duration_secs - 3.0).abs() < 1e-9);

        let reports = &dashboard.workflows["reports"];
        assert_eq!(reports.executions, 1);
        assert_eq!(reports.timed_out, 1);
    }
}
