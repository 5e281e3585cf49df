//! Cancellable repeating tasks on a worker thread.
//!
//! The stop channel doubles as the interval sleep, so cancelling wakes the
//! worker immediately instead of waiting out the interval.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What a tick asks the scheduler to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

pub struct Repeating {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Repeating {
    /// First tick after one interval
    pub fn spawn<F>(name: &str, interval: Duration, tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        Self::start(name, interval, false, tick)
    }

    /// First tick right away, then every interval
    pub fn spawn_now<F>(name: &str, interval: Duration, tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        Self::start(name, interval, true, tick)
    }

    fn start<F>(name: &str, interval: Duration, immediate: bool, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            if immediate && tick() == Tick::Stop {
                return;
            }
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if tick() == Tick::Stop {
                            break;
                        }
                    }
                    // Cancelled, or the owner went away
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!(task = %thread_name, "repeating task stopped");
        })?;

        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the task. No tick starts after this returns; a tick already
    /// running is waited for, unless called from the task itself.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            tracing::debug!(task = %self.name, "cancelling");
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Repeating {
    fn drop(&mut self) {
        self.cancel();
    }
}
