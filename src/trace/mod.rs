//! Execution tracing.
//!
//! Each model call, tool call, and workflow step is recorded as an
//! append-only span keyed to its owning session or run. Spans are ordered by
//! `(round, sequence)` so a replay reads in execution order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::store::{SpanKind, TraceSpan, TraceStore};
use crate::types::Usage;

/// Records spans for one owner. Cheap to clone.
#[derive(Clone)]
pub struct TraceRecorder {
    store: Arc<dyn TraceStore>,
    owner_id: Uuid,
    sequence: Arc<AtomicU64>,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn TraceStore>, owner_id: Uuid) -> Self {
        Self {
            store,
            owner_id,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start timing a unit of work.
    pub fn begin(&self, kind: SpanKind, name: impl Into<String>, round: usize) -> SpanTimer {
        SpanTimer {
            recorder: self.clone(),
            kind,
            name: name.into(),
            round,
            started: Instant::now(),
        }
    }

    async fn record(
        &self,
        kind: SpanKind,
        name: String,
        round: usize,
        duration_ms: u64,
        usage: Option<Usage>,
        ok: bool,
    ) {
        let span = TraceSpan {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            kind,
            name,
            round,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            duration_ms,
            usage,
            ok,
            created_at: Utc::now(),
        };
        // Tracing is best-effort; a storage failure must not fail the turn.
        if let Err(e) = self.store.record_span(span).await {
            tracing::warn!(owner_id = %self.owner_id, error = %e, "failed to record trace span");
        }
    }
}

/// In-flight span. Finish with [`SpanTimer::finish`].
pub struct SpanTimer {
    recorder: TraceRecorder,
    kind: SpanKind,
    name: String,
    round: usize,
    started: Instant,
}

impl SpanTimer {
    pub async fn finish(self, usage: Option<Usage>, ok: bool) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.recorder
            .record(self.kind, self.name, self.round, duration_ms, usage, ok)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn spans_get_monotonic_sequence_numbers() {
        let store = Arc::new(InMemoryStore::new());
        let owner = Uuid::new_v4();
        let recorder = TraceRecorder::new(store.clone(), owner);

        recorder
            .begin(SpanKind::LlmCall, "generate", 1)
            .finish(Some(Usage::new(10, 5)), true)
            .await;
        recorder
            .begin(SpanKind::ToolCall, "get_weather", 1)
            .finish(None, true)
            .await;
        recorder
            .begin(SpanKind::LlmCall, "generate", 2)
            .finish(None, false)
            .await;

        let spans = store.spans_for_owner(owner).await.unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(
            spans.iter().map(|s| s.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(!spans[2].ok);
    }
}
