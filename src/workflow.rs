//! Fetch, print and confirm, one job at a time.
//!
//! The server deletes a file when its print is confirmed, so the confirm call
//! is only ever made after the operator says yes, and at most once per job.

use crate::api::PrintShopApi;
use crate::error::{Error, Result, CONNECT_MESSAGE};
use crate::journal::Journal;
use crate::models::JobRef;
use crate::render::{PrintSurface, RenderSignal};
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Private codes are always this long
pub const CODE_LEN: usize = 6;

pub const CONFIRM_QUESTION: &str = "Did you complete printing?";
pub const CONFIRMED_MESSAGE: &str = "✅ Print confirmed! File deleted from server.";
pub const CANCELLED_MESSAGE: &str = "⚠️ Print cancelled. File is still available.";
pub const CONFIRM_FAILED_MESSAGE: &str = "❌ Failed to confirm print.";
pub const GONE_MESSAGE: &str = "⚠️ File already processed/deleted.";
pub const NOT_FOUND_MESSAGE: &str = "❌ File not found.";
pub const PROCESS_FAILED_MESSAGE: &str = "❌ Failed to process file.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    Fetching(JobRef),
    Rendering(JobRef),
    AwaitingConfirmation(JobRef),
    Done(JobRef),
    Error { job: JobRef, message: String },
}

/// Yes/no question put to the operator
pub trait Confirmer {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Asks on the terminal; anything but y/yes is a no
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn confirm(&mut self, question: &str) -> bool {
        print!("{} [y/N]: ", question);
        io::stdout().flush().ok();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_ok() {
            let input = input.trim().to_lowercase();
            input == "y" || input == "yes"
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Printed { job: JobRef, message: String },
    Declined { job: JobRef, message: String },
    Failed { job: JobRef, message: String },
}

impl Outcome {
    pub fn message(&self) -> &str {
        match self {
            Self::Printed { message, .. }
            | Self::Declined { message, .. }
            | Self::Failed { message, .. } => message,
        }
    }

    /// A confirmed private print leaves nothing to re-enter
    pub fn clears_code(&self) -> bool {
        matches!(self, Self::Printed { job: JobRef::Code(_), .. })
    }

    /// A confirmed queue print changes the queue
    pub fn refreshes_queue(&self) -> bool {
        matches!(self, Self::Printed { job: JobRef::Queue(_), .. })
    }
}

/// Operator-facing text for a failed document fetch
pub fn fetch_message(err: &Error) -> String {
    match err {
        Error::Gone => GONE_MESSAGE.to_string(),
        Error::NotFound => NOT_FOUND_MESSAGE.to_string(),
        e if e.is_connectivity() => CONNECT_MESSAGE.to_string(),
        Error::Validation(msg) => msg.clone(),
        _ => PROCESS_FAILED_MESSAGE.to_string(),
    }
}

/// Codes are looked up as typed; only surrounding whitespace is dropped
pub fn normalize_code(input: &str) -> String {
    input.trim().to_string()
}

/// Reject codes of the wrong length before any request
pub fn validate_code(code: &str) -> Result<()> {
    if code.chars().count() != CODE_LEN {
        return Err(Error::Validation(format!(
            "Print codes are {} characters, got '{}'",
            CODE_LEN, code
        )));
    }
    Ok(())
}

pub struct PrintWorkflow<S: PrintSurface, C: Confirmer> {
    api: Arc<dyn PrintShopApi>,
    surface: S,
    confirmer: C,
    journal: Option<Journal>,
    confirm_delay: Duration,
    state: State,
    confirmed: HashSet<JobRef>,
}

impl<S: PrintSurface, C: Confirmer> PrintWorkflow<S, C> {
    pub fn new(api: Arc<dyn PrintShopApi>, surface: S, confirmer: C) -> Self {
        Self {
            api,
            surface,
            confirmer,
            journal: None,
            confirm_delay: Duration::ZERO,
            state: State::Idle,
            confirmed: HashSet::new(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Pause between the print finishing and the confirmation question
    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = delay;
        self
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_confirmed(&self, job: &JobRef) -> bool {
        self.confirmed.contains(job)
    }

    fn in_flight(&self) -> bool {
        matches!(
            self.state,
            State::Fetching(_) | State::Rendering(_) | State::AwaitingConfirmation(_)
        )
    }

    fn record(&mut self, write: impl FnOnce(&mut Journal) -> anyhow::Result<()>) {
        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = write(&mut *journal) {
                tracing::warn!(error = %e, path = %journal.path.display(), "journal write failed");
            }
        }
    }

    fn fail(&mut self, job: JobRef, message: String) -> Outcome {
        self.state = State::Error {
            job: job.clone(),
            message: message.clone(),
        };
        Outcome::Failed { job, message }
    }

    /// Run one full cycle for `job`
    pub fn run(&mut self, job: JobRef) -> Outcome {
        if self.in_flight() {
            return Outcome::Failed {
                job,
                message: "A print is already in progress.".to_string(),
            };
        }
        if let JobRef::Code(code) = &job {
            if let Err(e) = validate_code(code) {
                return Outcome::Failed {
                    job,
                    message: e.user_message(),
                };
            }
        }
        if self.confirmed.contains(&job) {
            tracing::info!(%job, "already confirmed here, not fetching again");
            return self.fail(job, GONE_MESSAGE.to_string());
        }

        self.state = State::Fetching(job.clone());
        let doc = match self.api.fetch_document(&job) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(%job, error = %e, "fetch failed");
                let message = fetch_message(&e);
                self.record(|j| j.fetch_failed(&job, &message));
                return self.fail(job, message);
            }
        };

        self.state = State::Rendering(job.clone());
        let signal = match self.surface.print(&doc, &job.to_string()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(%job, error = %e, "render failed");
                return self.fail(job, e.user_message());
            }
        };
        let completed = signal == RenderSignal::Completed;
        self.record(|j| j.rendered(&job, doc.bytes.len(), completed));

        if !self.confirm_delay.is_zero() {
            thread::sleep(self.confirm_delay);
        }

        self.state = State::AwaitingConfirmation(job.clone());
        if !self.confirmer.confirm(CONFIRM_QUESTION) {
            self.record(|j| j.declined(&job));
            self.state = State::Idle;
            return Outcome::Declined {
                job,
                message: CANCELLED_MESSAGE.to_string(),
            };
        }

        self.confirm(job)
    }

    fn confirm(&mut self, job: JobRef) -> Outcome {
        match &self.state {
            State::AwaitingConfirmation(awaiting) if *awaiting == job => {}
            _ => return self.fail(job, CONFIRM_FAILED_MESSAGE.to_string()),
        }

        match self.api.confirm_print(&job) {
            Ok(()) => {
                tracing::info!(%job, "print confirmed");
                self.confirmed.insert(job.clone());
                self.record(|j| j.confirmed(&job));
                self.state = State::Done(job.clone());
                Outcome::Printed {
                    job,
                    message: CONFIRMED_MESSAGE.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(%job, error = %e, "confirm failed");
                let detail = e.to_string();
                self.record(|j| j.confirm_failed(&job, &detail));
                self.fail(job, CONFIRM_FAILED_MESSAGE.to_string())
            }
        }
    }
}

/// One-shot retrieval: fetch by code and write it out, without confirming
pub fn download(api: &dyn PrintShopApi, code: &str, dest: &Path) -> Result<usize> {
    validate_code(code)?;
    let doc = api.fetch_document(&JobRef::Code(code.to_string()))?;
    std::fs::write(dest, &doc.bytes)?;
    tracing::info!(code, dest = %dest.display(), bytes = doc.bytes.len(), "downloaded");
    Ok(doc.bytes.len())
}
