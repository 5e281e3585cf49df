//! The shop's live queue table.

use crate::api::PrintShopApi;
use crate::error::Result;
use crate::models::{JobStatus, PrintJob};
use crate::schedule::{Repeating, Tick};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Last queue fetch as the backend ordered it
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub jobs: Vec<PrintJob>,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Set when the most recent refresh failed; `jobs` is then the previous result
    pub last_error: Option<String>,
}

impl QueueSnapshot {
    pub fn find(&self, id: i64) -> Option<&PrintJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// First job that has not been printed yet
    pub fn next_pending(&self) -> Option<&PrintJob> {
        self.jobs.iter().find(|j| !j.status.is_terminal())
    }
}

/// Fetch the queue once, newest backend order preserved
pub fn fetch_once(api: &dyn PrintShopApi) -> Result<Vec<PrintJob>> {
    let jobs = api.queue()?;
    tracing::debug!(count = jobs.len(), "fetched queue");
    Ok(jobs)
}

pub struct QueueTable {
    api: Arc<dyn PrintShopApi>,
    snapshot: Arc<Mutex<QueueSnapshot>>,
    task: Option<Repeating>,
}

fn lock(snapshot: &Mutex<QueueSnapshot>) -> MutexGuard<'_, QueueSnapshot> {
    snapshot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replace the snapshot on success, keep it and record the error on failure
fn apply(snapshot: &Mutex<QueueSnapshot>, result: Result<Vec<PrintJob>>) {
    let mut snap = lock(snapshot);
    match result {
        Ok(jobs) => {
            snap.jobs = jobs;
            snap.refreshed_at = Some(Utc::now());
            snap.last_error = None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "queue refresh failed, keeping previous list");
            snap.last_error = Some(e.user_message());
        }
    }
}

impl QueueTable {
    pub fn new(api: Arc<dyn PrintShopApi>) -> Self {
        Self {
            api,
            snapshot: Arc::new(Mutex::new(QueueSnapshot::default())),
            task: None,
        }
    }

    /// Refresh right away and then every `interval` until dropped
    pub fn watch(&mut self, interval: Duration) -> std::io::Result<()> {
        self.stop();
        let api = Arc::clone(&self.api);
        let snapshot = Arc::clone(&self.snapshot);
        let task = Repeating::spawn_now("queue-refresh", interval, move || {
            apply(&snapshot, fetch_once(api.as_ref()));
            Tick::Continue
        })?;
        tracing::info!(interval_ms = interval.as_millis() as u64, "watching queue");
        self.task = Some(task);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
        }
    }

    /// Refresh on the caller's thread, e.g. after a confirmed print
    pub fn refresh_now(&self) {
        apply(&self.snapshot, fetch_once(self.api.as_ref()));
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        lock(&self.snapshot).clone()
    }

    pub fn find(&self, id: i64) -> Option<PrintJob> {
        lock(&self.snapshot).find(id).cloned()
    }
}

impl Drop for QueueTable {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Table rows for the shop desk
pub fn format_queue(snapshot: &QueueSnapshot) -> String {
    if snapshot.jobs.is_empty() {
        return "Queue is empty".to_string();
    }
    let mut out = format!(
        "{:<4} {:<6} {:<24} {:>5} {:>6} {:<7} {:<6} {:<6} {}\n",
        "#", "ID", "File", "Pages", "Copies", "Mode", "Color", "Paper", "Status"
    );
    for job in &snapshot.jobs {
        let position = job
            .ticket
            .queue_position()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match job.status {
            JobStatus::Downloaded => "printed",
            _ => "waiting",
        };
        out.push_str(&format!(
            "{:<4} {:<6} {:<24} {:>5} {:>6} {:<7} {:<6} {:<6} {}\n",
            position,
            job.id,
            truncate(job.filename.as_deref().unwrap_or("(unnamed)"), 24),
            job.num_pages,
            job.copies,
            job.print_mode.as_str(),
            job.color_mode.as_str(),
            job.paper_size.as_str(),
            status
        ));
    }
    if let Some(err) = &snapshot.last_error {
        out.push_str(&format!("(last refresh failed: {})\n", err));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
