//! Background eviction of abandoned sessions.
//!
//! The dispatcher already refuses sessions older than the session timeout
//! with `session-expired`; the sweeper only drops entries once they are twice
//! that old, so late requesters still get the specific error for a while.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::session::SessionTable;

/// Removes every session older than `max_age` and returns how many went.
pub fn sweep_once(table: &SessionTable, max_age: Duration) -> usize {
    let now = Instant::now();
    let mut swept = 0usize;
    for (session_id, entry) in table.snapshot_all() {
        let age = now.saturating_duration_since(entry.created_at());
        if age <= max_age {
            continue;
        }
        // The entry may have been replaced or removed since the snapshot.
        if table.remove_entry(&session_id, &entry) {
            counter!("beach_commands_sessions_swept_total", 1, "node" => entry.node().to_string());
            debug!(
                session_id = %session_id,
                node = entry.node(),
                age_secs = age.as_secs(),
                "swept stale session"
            );
            swept += 1;
        }
    }
    swept
}

pub struct SessionSweeper {
    table: SessionTable,
    max_age: Duration,
    interval: Duration,
    running: AtomicBool,
    stopped: AtomicBool,
    stop: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSweeper {
    pub fn new(table: SessionTable, max_age: Duration, interval: Duration) -> Self {
        Self {
            table,
            max_age,
            interval,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// Starts the sweep loop unless it is already running. Returns whether
    /// this call started it. Must be called from within a tokio runtime.
    pub fn ensure_started(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let table = self.table.clone();
        let max_age = self.max_age;
        let period = self.interval;
        let stop = Arc::clone(&self.stop);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        let swept = sweep_once(&table, max_age);
                        if swept > 0 {
                            debug!(swept, remaining = table.len(), "session sweep finished");
                        }
                    }
                }
            }
            debug!("session sweeper stopped");
        });
        *self.task.lock() = Some(handle);
        info!(
            interval_ms = period.as_millis() as u64,
            max_age_secs = max_age.as_secs(),
            "session sweeper started"
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the loop for good and waits for it to exit.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_one();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "session sweeper task failed");
                }
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for SessionSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
