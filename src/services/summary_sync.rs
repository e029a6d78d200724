use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{RowKey, SummaryUpdate};
use crate::repository::SummaryWriter;
use crate::services::error_handling::{ErrorContext, LogHelper};

pub const DEFAULT_SUMMARY_DEBOUNCE: Duration = Duration::from_millis(500);

type WrittenHook = Arc<dyn Fn(&SummaryUpdate) + Send + Sync>;

struct PendingWrite {
    update: SummaryUpdate,
    seq: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct SyncState {
    pending: HashMap<RowKey, PendingWrite>,
    seq: u64,
    writes: u64,
    last_error: Option<Arc<anyhow::Error>>,
    /// Rows whose latest write failed, until a write for them succeeds.
    failed: HashMap<RowKey, Arc<anyhow::Error>>,
}

struct Inner {
    writer: Arc<dyn SummaryWriter>,
    delay: Duration,
    state: Mutex<SyncState>,
    on_written: Mutex<Option<WrittenHook>>,
}

/// Debounced write-back of summary edits, one timer per row.
///
/// Each edit replaces the pending text for its row and restarts that row's
/// timer. A write that has already started is left to finish.
#[derive(Clone)]
pub struct SummarySync {
    inner: Arc<Inner>,
}

impl SummarySync {
    pub fn new(writer: Arc<dyn SummaryWriter>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer,
                delay,
                state: Mutex::new(SyncState::default()),
                on_written: Mutex::new(None),
            }),
        }
    }

    /// Called after every successful write.
    pub fn on_written(&self, hook: impl Fn(&SummaryUpdate) + Send + Sync + 'static) {
        *self.inner.on_written.lock() = Some(Arc::new(hook));
    }

    pub fn schedule(&self, update: SummaryUpdate) {
        let key = update.key();
        let mut state = self.inner.state.lock();
        if let Some(previous) = state.pending.remove(&key) {
            previous.timer.abort();
        }
        state.seq += 1;
        let seq = state.seq;

        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            let Some(update) = inner.take_pending(&timer_key, seq) else {
                return;
            };
            debug!(row = %timer_key, "Summary debounce elapsed");
            let _ = inner.write(update).await;
        });

        state.pending.insert(key, PendingWrite { update, seq, timer });
    }

    /// Writes every pending edit now, in no particular order.
    pub async fn flush(&self) -> Result<usize> {
        let drained: Vec<SummaryUpdate> = {
            let mut state = self.inner.state.lock();
            state
                .pending
                .drain()
                .map(|(_, pending)| {
                    pending.timer.abort();
                    pending.update
                })
                .collect()
        };

        let mut written = 0;
        let mut first_error = None;
        for update in drained {
            match self.inner.write(update).await {
                Ok(()) => written += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    pub fn pending_text(&self, key: &RowKey) -> Option<String> {
        self.inner
            .state
            .lock()
            .pending
            .get(key)
            .map(|p| p.update.text.clone())
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.inner.state.lock().writes
    }

    pub fn last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn take_last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.state.lock().last_error.take()
    }

    /// Failure of the latest write for `key`, if it has not been
    /// superseded by a successful one.
    pub fn failure(&self, key: &RowKey) -> Option<Arc<anyhow::Error>> {
        self.inner.state.lock().failed.get(key).cloned()
    }

    pub fn failed_len(&self) -> usize {
        self.inner.state.lock().failed.len()
    }
}

impl Inner {
    fn take_pending(&self, key: &RowKey, seq: u64) -> Option<SummaryUpdate> {
        let mut state = self.state.lock();
        match state.pending.get(key) {
            Some(pending) if pending.seq == seq => state.pending.remove(key).map(|p| p.update),
            _ => None,
        }
    }

    async fn write(&self, update: SummaryUpdate) -> Result<()> {
        let result = self.writer.write_summary(&update).await.and_then(|outcome| {
            if outcome.success {
                Ok(())
            } else {
                Err(anyhow::anyhow!("Summary write for {} was rejected", update.key()))
            }
        });
        let result = ErrorContext::new("write_summary")
            .with_detail("row", update.key())
            .with_detail("cleared", update.is_clear())
            .wrap(result);

        match result {
            Ok(()) => {
                info!(row = %update.key(), cleared = update.is_clear(), "Summary written");
                {
                    let mut state = self.state.lock();
                    state.writes += 1;
                    state.failed.remove(&update.key());
                }
                let hook = self.on_written.lock().clone();
                if let Some(hook) = hook {
                    hook(&update);
                }
                Ok(())
            }
            Err(e) => {
                LogHelper::log_error_with_context("summary write", &e);
                let message = format!("{:#}", e);
                let error = Arc::new(e);
                let mut state = self.state.lock();
                state.failed.insert(update.key(), Arc::clone(&error));
                state.last_error = Some(error);
                drop(state);
                Err(anyhow::anyhow!(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WriteOutcome;
    use crate::repository::traits::MockSummaryWriter;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(project: &str) -> RowKey {
        RowKey::new(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), "Acme", project)
    }

    fn recording_writer(log: Arc<Mutex<Vec<SummaryUpdate>>>) -> MockSummaryWriter {
        let mut writer = MockSummaryWriter::new();
        writer.expect_write_summary().returning(move |update| {
            log.lock().push(update.clone());
            Ok(WriteOutcome { success: true })
        });
        writer
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_write_only_latest_text() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sync = SummarySync::new(Arc::new(recording_writer(log.clone())), Duration::from_millis(500));

        sync.schedule(SummaryUpdate::new(&key("Web"), "d"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        sync.schedule(SummaryUpdate::new(&key("Web"), "do"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        sync.schedule(SummaryUpdate::new(&key("Web"), "done"));
        assert_eq!(sync.pending_text(&key("Web")).as_deref(), Some("done"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let written = log.lock().clone();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].text, "done");
        assert_eq!(sync.pending_len(), 0);
        assert_eq!(sync.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_debounce_independently() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sync = SummarySync::new(Arc::new(recording_writer(log.clone())), Duration::from_millis(500));

        sync.schedule(SummaryUpdate::new(&key("Web"), "a"));
        sync.schedule(SummaryUpdate::new(&key("App"), "b"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately_and_runs_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sync = SummarySync::new(Arc::new(recording_writer(log.clone())), Duration::from_secs(60));
        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = hooked.clone();
        sync.on_written(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sync.schedule(SummaryUpdate::new(&key("Web"), ""));
        assert_eq!(sync.flush().await.unwrap(), 1);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);
        assert!(log.lock()[0].is_clear());

        // The aborted timer must not write again.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_reported() {
        let mut writer = MockSummaryWriter::new();
        writer
            .expect_write_summary()
            .returning(|_| Err(anyhow::anyhow!("database is locked")));
        let sync = SummarySync::new(Arc::new(writer), Duration::from_millis(500));

        sync.schedule(SummaryUpdate::new(&key("Web"), "text"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let error = sync.take_last_error().unwrap();
        let message = format!("{:#}", error);
        assert!(message.contains("write_summary"));
        assert!(message.contains("database is locked"));
        assert!(sync.last_error().is_none());
        assert_eq!(sync.write_count(), 0);
        // The row stays marked after the one-shot error is taken.
        assert!(sync.failure(&key("Web")).is_some());
    }

    #[tokio::test]
    async fn test_failure_mark_cleared_by_later_success() {
        let mut writer = MockSummaryWriter::new();
        let mut seq = mockall::Sequence::new();
        writer
            .expect_write_summary()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow::anyhow!("disk full")));
        writer
            .expect_write_summary()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(WriteOutcome { success: true }));
        let sync = SummarySync::new(Arc::new(writer), Duration::from_millis(500));

        sync.schedule(SummaryUpdate::new(&key("Web"), "first"));
        assert!(sync.flush().await.is_err());
        assert_eq!(sync.failed_len(), 1);
        assert!(sync.failure(&key("App")).is_none());

        sync.schedule(SummaryUpdate::new(&key("Web"), "second"));
        assert_eq!(sync.flush().await.unwrap(), 1);
        assert!(sync.failure(&key("Web")).is_none());
        assert_eq!(sync.failed_len(), 0);
    }

    #[tokio::test]
    async fn test_rejected_outcome_is_an_error() {
        let mut writer = MockSummaryWriter::new();
        writer
            .expect_write_summary()
            .returning(|_| Ok(WriteOutcome { success: false }));
        let sync = SummarySync::new(Arc::new(writer), Duration::from_millis(500));

        sync.schedule(SummaryUpdate::new(&key("Web"), "text"));
        assert!(sync.flush().await.is_err());
        assert!(sync.last_error().is_some());
    }
}
