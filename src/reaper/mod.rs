//! Lifecycle Reaper (C12): the three periodic sweeps of §4.12, grounded
//! on the teacher's periodic-tracking idiom but narrowed from generic
//! activity analytics down to stuck-task recovery and idle-session
//! closure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::db::{SessionsRepository, TasksRepository};
use crate::metrics::MetricsRegistry;
use crate::queue::{RedisWorkQueue, WorkQueue};
use crate::store::{default_lifecycle_rules, ObjectStore};
use crate::versioning::VersionEngine;

const STUCK_QUEUED_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const STUCK_PROCESSING_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const STUCK_REDIS_PROCESSING_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long a `queued` task can sit unpicked before the reaper assumes
/// the message that should have enqueued it was lost and republishes.
const STUCK_QUEUED_THRESHOLD: Duration = Duration::from_secs(300);

pub struct LifecycleReaper {
    db: Arc<dyn TasksRepository>,
    sessions: Arc<dyn SessionsRepository>,
    queue: Arc<RedisWorkQueue>,
    store: Arc<dyn ObjectStore>,
    versions: Arc<VersionEngine>,
    metrics: Arc<MetricsRegistry>,
    worker_task_timeout: Duration,
    session_idle_timeout: Duration,
}

impl LifecycleReaper {
    pub fn new(
        db: Arc<dyn TasksRepository>,
        sessions: Arc<dyn SessionsRepository>,
        queue: Arc<RedisWorkQueue>,
        store: Arc<dyn ObjectStore>,
        versions: Arc<VersionEngine>,
        metrics: Arc<MetricsRegistry>,
        worker_task_timeout: Duration,
        session_idle_timeout: Duration,
    ) -> Self {
        Self { db, sessions, queue, store, versions, metrics, worker_task_timeout, session_idle_timeout }
    }

    /// Declares the object-store lifecycle policy once at startup (§4.12:
    /// "No runtime loop is needed in-process if the object store applies
    /// rules natively").
    #[instrument(skip(self))]
    pub async fn declare_lifecycle(&self) {
        if let Err(e) = self.store.declare_lifecycle(&default_lifecycle_rules()).await {
            warn!(error = %e, "failed to declare object store lifecycle policy at startup");
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        self.declare_lifecycle().await;

        let mut queued_tick = tokio::time::interval(STUCK_QUEUED_SWEEP_INTERVAL);
        let mut processing_tick = tokio::time::interval(STUCK_PROCESSING_SWEEP_INTERVAL);
        let mut session_tick = tokio::time::interval(IDLE_SESSION_SWEEP_INTERVAL);
        let mut redis_processing_tick = tokio::time::interval(STUCK_REDIS_PROCESSING_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = queued_tick.tick() => self.sweep_stuck_queued().await,
                _ = processing_tick.tick() => self.sweep_stuck_processing().await,
                _ = session_tick.tick() => self.sweep_idle_sessions().await,
                _ = redis_processing_tick.tick() => self.sweep_stuck_redis_processing().await,
            }
        }
    }

    #[instrument(skip(self))]
    async fn sweep_stuck_queued(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(STUCK_QUEUED_THRESHOLD).unwrap();
        let stuck = match self.db.list_stuck_queued(cutoff).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "list_stuck_queued failed");
                return;
            }
        };

        for task_id in stuck {
            if let Err(e) = self.queue.push(task_id).await {
                warn!(%task_id, error = %e, "failed to republish stuck queued task");
                continue;
            }
            self.metrics.reaper_tasks_requeued_total.inc();
            info!(%task_id, "re-enqueued a task stuck in queued");
        }
    }

    /// §5: "Worker processing: bounded by a per-task cap (default 10
    /// min); exceeded -> task failed with `Timeout`."
    #[instrument(skip(self))]
    async fn sweep_stuck_processing(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.worker_task_timeout).unwrap();
        let stuck = match self.db.list_stuck_processing(cutoff).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "list_stuck_processing failed");
                return;
            }
        };

        for task_id in stuck {
            if let Err(e) = self.db.fail_task(task_id, "Timeout").await {
                warn!(%task_id, error = %e, "failed to fail a timed-out task");
                continue;
            }
            self.metrics.reaper_tasks_requeued_total.inc();
            info!(%task_id, "failed a task stuck in processing past its timeout");
        }
    }

    /// C3/C7: a task a worker popped off `ocr:tasks` into
    /// `ocr:tasks:processing` but never acknowledged (crash before the
    /// DB's `cas_to_processing`, or anywhere after) would otherwise sit
    /// in the Redis processing list forever — this is the transport-level
    /// counterpart to `sweep_stuck_processing`, which only sees tasks
    /// that made it as far as the DB's `processing` status.
    #[instrument(skip(self))]
    async fn sweep_stuck_redis_processing(&self) {
        let reclaimed = match self.queue.reclaim_stuck(self.worker_task_timeout).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "reclaim_stuck failed");
                return;
            }
        };

        for task_id in reclaimed {
            self.metrics.reaper_tasks_requeued_total.inc();
            info!(%task_id, "reclaimed a task stuck in the redis processing list");
        }
    }

    /// §4.10: "The engine also ends sessions with `last_activity_at`
    /// older than the idle-timeout ... via a periodic reaper."
    #[instrument(skip(self))]
    async fn sweep_idle_sessions(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.session_idle_timeout).unwrap();
        let idle = match self.sessions.list_idle_sessions(cutoff).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "list_idle_sessions failed");
                return;
            }
        };

        for session_id in idle {
            let session = match self.sessions.get_session(session_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%session_id, error = %e, "failed to load idle session for reaping");
                    continue;
                }
            };
            if let Err(e) = self.versions.end_session(session_id, session.user_id, None, "idle_timeout").await {
                warn!(%session_id, error = %e, "failed to close idle session");
                continue;
            }
            self.metrics.reaper_sessions_closed_total.inc();
            info!(%session_id, "closed an idle edit session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuck_queued_threshold_is_five_minutes() {
        assert_eq!(STUCK_QUEUED_THRESHOLD, Duration::from_secs(300));
    }
}
