//! Cron-scheduled workflow runs.
//!
//! An injectable service with an explicit lifecycle: `start` rebuilds the
//! live scheduler from persisted rows, `shutdown` cancels it. Runs that came
//! due while the process was offline are skipped, never executed late; their
//! next occurrence is recomputed from the current wall clock.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::store::{ScheduleStore, WorkflowSchedule};

/// Idle poll interval when no schedule has a due time.
const IDLE_WAKE: Duration = Duration::from_secs(60);

/// Callback the service invokes when a schedule fires.
#[async_trait]
pub trait ScheduleHandler: Send + Sync {
    async fn run_scheduled(&self, workflow_id: Uuid);
}

/// Process-wide scheduler for cron-bound workflows.
pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
    handler: Arc<dyn ScheduleHandler>,
    cancel: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn ScheduleStore>, handler: Arc<dyn ScheduleHandler>) -> Self {
        Self {
            store,
            handler,
            cancel: CancellationToken::new(),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Register (or replace) a schedule. The expression is validated and the
    /// next occurrence computed immediately.
    pub async fn register(&self, workflow_id: Uuid, cron_expr: &str) -> Result<WorkflowSchedule> {
        let next_run = next_occurrence(cron_expr, Utc::now())?;
        let schedule = WorkflowSchedule {
            id: Uuid::new_v4(),
            workflow_id,
            cron: cron_expr.to_string(),
            active: true,
            next_run: Some(next_run),
            last_run: None,
        };
        self.store.upsert_schedule(schedule.clone()).await?;
        Ok(schedule)
    }

    /// Rebuild state from storage and start the tick loop. Occurrences missed
    /// while offline are skipped: their next run is recomputed from now.
    pub async fn start(&self) -> Result<()> {
        let now = Utc::now();
        let mut skipped = 0usize;
        for mut schedule in self.store.list_schedules().await? {
            if !schedule.active {
                continue;
            }
            let stale = schedule.next_run.map(|next| next <= now).unwrap_or(true);
            if stale {
                schedule.next_run = next_occurrence(&schedule.cron, now).ok();
                self.store.upsert_schedule(schedule).await?;
                skipped += 1;
            }
        }
        if skipped > 0 {
            tracing::info!(count = skipped, "skipped schedule occurrences missed while offline");
        }

        let store = self.store.clone();
        let handler = self.handler.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tick_loop(store, handler, cancel).await;
        });
        *self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Cancel the tick loop. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for ScheduleService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn tick_loop(
    store: Arc<dyn ScheduleStore>,
    handler: Arc<dyn ScheduleHandler>,
    cancel: CancellationToken,
) {
    loop {
        let now = Utc::now();
        let mut next_wake: Option<DateTime<Utc>> = None;

        match store.list_schedules().await {
            Ok(schedules) => {
                for schedule in schedules.into_iter().filter(|s| s.active) {
                    let Some(due) = schedule.next_run else { continue };
                    if due <= now {
                        tracing::info!(
                            schedule_id = %schedule.id,
                            workflow_id = %schedule.workflow_id,
                            "schedule fired"
                        );
                        // Each run gets its own task; the timer loop never
                        // waits on a workflow.
                        let run_handler = handler.clone();
                        let workflow_id = schedule.workflow_id;
                        tokio::spawn(async move {
                            run_handler.run_scheduled(workflow_id).await;
                        });
                        let next = next_occurrence(&schedule.cron, now).ok();
                        if let Err(error) =
                            store.mark_schedule_ran(schedule.id, now, next).await
                        {
                            tracing::warn!(schedule_id = %schedule.id, %error, "failed to record schedule run");
                        }
                        if let Some(next) = next {
                            next_wake = earliest(next_wake, next);
                        }
                    } else {
                        next_wake = earliest(next_wake, due);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to list schedules");
            }
        }

        let sleep_for = next_wake
            .map(|wake| (wake - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(IDLE_WAKE)
            .min(IDLE_WAKE);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

fn earliest(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match current {
        Some(existing) if existing <= candidate => Some(existing),
        _ => Some(candidate),
    }
}

/// Next occurrence of a cron expression strictly after `after`.
pub fn next_occurrence(cron_expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = cron::Schedule::from_str(cron_expr)
        .map_err(|err| EngineError::Schedule(format!("invalid cron '{cron_expr}': {err}")))?;
    schedule.after(&after).next().ok_or_else(|| {
        EngineError::Schedule(format!("cron '{cron_expr}' has no future occurrence"))
    })
}
