use crate::{
    models::{ApiError, ScanOutcome, ScanRequest},
    pipeline::Pipeline,
    security::AuthContext,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Background scans, run one at a time by a single worker. Finished jobs
/// stay queryable for `retention`, then are dropped on the next access.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    retention: Duration,
}

struct Job {
    id: Uuid,
    request: ScanRequest,
    context: AuthContext,
    cancel: CancellationToken,
}

struct JobEntry {
    state: JobState,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

impl JobEntry {
    fn transition(&mut self, state: JobState) {
        self.state = state;
        if self.state.is_finished() {
            self.finished_at.get_or_insert_with(Instant::now);
        }
    }
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: ScanOutcome },
    Cancelled { result: Option<ScanOutcome> },
    Failed { error: String, stage: Option<String> },
}

impl JobState {
    fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Completed { .. } | JobState::Cancelled { .. } | JobState::Failed { .. }
        )
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(
        pipeline: Pipeline,
        capacity: usize,
        retention: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let jobs_bg = jobs.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if job.cancel.is_cancelled() {
                    continue;
                }
                set_state(&jobs_bg, job.id, JobState::Running).await;
                info!(
                    target = "watch_scout.scan",
                    job_id = %job.id,
                    caller = %job.context.caller,
                    seller = %job.request.seller_username,
                    "scan job started"
                );

                let result = pipeline.run_with_cancel(job.request, &job.cancel).await;
                let state = match result {
                    Ok(outcome) if outcome.cancelled => JobState::Cancelled {
                        result: Some(outcome),
                    },
                    Ok(outcome) => JobState::Completed { result: outcome },
                    Err(err) => JobState::Failed {
                        error: err.detail().to_string(),
                        stage: Some(err.stage().to_string()),
                    },
                };
                set_state(&jobs_bg, job.id, state).await;
            }
        });

        (
            Self {
                tx,
                jobs,
                retention,
            },
            handle,
        )
    }

    pub async fn enqueue_scan(
        &self,
        request: ScanRequest,
        context: AuthContext,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut guard = self.jobs.lock().await;
            evict_expired(&mut guard, self.retention, Instant::now());
            guard.insert(
                id,
                JobEntry {
                    state: JobState::Queued,
                    cancel: cancel.clone(),
                    finished_at: None,
                },
            );
        }
        let job = Job {
            id,
            request,
            context,
            cancel,
        };
        if self.tx.try_send(job).is_err() {
            self.jobs.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_full".into(),
                detail: Some("scan queue is full or the worker is gone".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let mut guard = self.jobs.lock().await;
        evict_expired(&mut guard, self.retention, Instant::now());
        guard.get(&id).map(|entry| JobInfo {
            id: id.to_string(),
            state: entry.state.clone(),
        })
    }

    /// Cancels a queued or running scan. Returns `None` for unknown ids.
    pub async fn cancel(&self, id: Uuid) -> Option<JobInfo> {
        let mut guard = self.jobs.lock().await;
        evict_expired(&mut guard, self.retention, Instant::now());
        let entry = guard.get_mut(&id)?;
        if !entry.state.is_finished() {
            entry.cancel.cancel();
            if matches!(entry.state, JobState::Queued) {
                entry.transition(JobState::Cancelled { result: None });
            }
        }
        Some(JobInfo {
            id: id.to_string(),
            state: entry.state.clone(),
        })
    }
}

async fn set_state(jobs: &Mutex<HashMap<Uuid, JobEntry>>, id: Uuid, state: JobState) {
    if let Some(entry) = jobs.lock().await.get_mut(&id) {
        entry.transition(state);
    }
}

fn evict_expired(jobs: &mut HashMap<Uuid, JobEntry>, retention: Duration, now: Instant) {
    let before = jobs.len();
    jobs.retain(|_, entry| {
        entry
            .finished_at
            .is_none_or(|at| now.saturating_duration_since(at) < retention)
    });
    let evicted = before - jobs.len();
    if evicted > 0 {
        debug!(target = "watch_scout.scan", evicted, "dropped expired scan jobs");
    }
}
