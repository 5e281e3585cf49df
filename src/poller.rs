//! Status polling for private print codes.
//!
//! One repeating task per code, shared by every subscriber of that code.
//! The task ends when the job is downloaded, when it disappears, or when the
//! last subscription is dropped.

use crate::api::PrintShopApi;
use crate::error::Error;
use crate::models::JobStatus;
use crate::schedule::{Repeating, Tick};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    Status(JobStatus),
    Finished(PollEnd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEnd {
    /// The shop confirmed the print
    Downloaded,
    /// The server no longer knows the code
    Missing,
}

struct Entry {
    listeners: HashMap<u64, Sender<PollEvent>>,
    task: Option<Repeating>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_watched(&self, code: &str) -> bool {
        self.entries()
            .get(code)
            .is_some_and(|e| !e.listeners.is_empty())
    }

    fn broadcast(&self, code: &str, event: PollEvent) {
        if let Some(entry) = self.entries().get(code) {
            for tx in entry.listeners.values() {
                let _ = tx.send(event);
            }
        }
    }

    /// Notify listeners and drop the entry. The task is released outside the lock.
    fn finish(&self, code: &str, end: PollEnd) {
        let removed = self.entries().remove(code);
        if let Some(entry) = removed {
            for tx in entry.listeners.values() {
                let _ = tx.send(PollEvent::Finished(end));
            }
            drop(entry);
        }
    }

    fn unsubscribe(&self, code: &str, id: u64) {
        let removed = {
            let mut entries = self.entries();
            let now_empty = match entries.get_mut(code) {
                Some(entry) => {
                    entry.listeners.remove(&id);
                    entry.listeners.is_empty()
                }
                None => false,
            };
            if now_empty {
                entries.remove(code)
            } else {
                None
            }
        };
        if removed.is_some() {
            tracing::debug!(code, "last subscriber left, stopping poll");
        }
    }
}

pub struct StatusPoller {
    api: Arc<dyn PrintShopApi>,
    interval: Duration,
    inner: Arc<Inner>,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn PrintShopApi>, interval: Duration) -> Self {
        Self {
            api,
            interval,
            inner: Arc::new(Inner::default()),
        }
    }

    /// Watch `code`. Joins the existing poll for that code if there is one.
    pub fn subscribe(&self, code: &str) -> std::io::Result<Subscription> {
        let (tx, rx) = mpsc::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        let mut entries = self.inner.entries();
        if let Some(entry) = entries.get_mut(code) {
            entry.listeners.insert(id, tx);
            tracing::debug!(code, listeners = entry.listeners.len(), "joined existing poll");
        } else {
            let task = Repeating::spawn(
                &format!("poll-{}", code),
                self.interval,
                self.tick(code),
            )?;
            entries.insert(
                code.to_string(),
                Entry {
                    listeners: HashMap::from([(id, tx)]),
                    task: Some(task),
                },
            );
            tracing::info!(code, interval_ms = self.interval.as_millis() as u64, "polling status");
        }

        Ok(Subscription {
            code: code.to_string(),
            id,
            inner: Arc::downgrade(&self.inner),
            events: rx,
        })
    }

    fn tick(&self, code: &str) -> impl FnMut() -> Tick + Send + 'static {
        let inner = Arc::downgrade(&self.inner);
        let api = Arc::clone(&self.api);
        let code = code.to_string();

        move || {
            let Some(inner) = inner.upgrade() else {
                return Tick::Stop;
            };
            if !inner.is_watched(&code) {
                return Tick::Stop;
            }

            match api.file_status(&code) {
                Ok(status) => {
                    tracing::debug!(code = %code, ?status, "status");
                    inner.broadcast(&code, PollEvent::Status(status));
                    if status.is_terminal() {
                        inner.finish(&code, PollEnd::Downloaded);
                        Tick::Stop
                    } else {
                        Tick::Continue
                    }
                }
                Err(Error::NotFound | Error::Gone) => {
                    inner.finish(&code, PollEnd::Missing);
                    Tick::Stop
                }
                Err(e) => {
                    tracing::warn!(code = %code, error = %e, "status check failed, will retry next tick");
                    Tick::Continue
                }
            }
        }
    }

    /// Number of codes currently being polled
    pub fn active_polls(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn listener_count(&self, code: &str) -> usize {
        self.inner
            .entries()
            .get(code)
            .map_or(0, |e| e.listeners.len())
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        let drained: Vec<Entry> = self.inner.entries().drain().map(|(_, e)| e).collect();
        for mut entry in drained {
            if let Some(mut task) = entry.task.take() {
                task.cancel();
            }
        }
    }
}

/// Receiving end of a status subscription; dropping it unsubscribes
pub struct Subscription {
    code: String,
    id: u64,
    inner: Weak<Inner>,
    events: Receiver<PollEvent>,
}

impl Subscription {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Block until the next event. None once the poll is over.
    pub fn recv(&self) -> Option<PollEvent> {
        self.events.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<PollEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.code, self.id);
        }
    }
}
