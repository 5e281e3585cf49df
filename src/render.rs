//! Handing fetched documents to the printer.

use crate::error::{Error, Result};
use crate::models::Document;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// How a render ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSignal {
    /// The print command exited successfully
    Completed,
    /// The fallback timeout elapsed first; the command may still be running
    TimedOut,
}

/// Anything that can put a document in front of the printer
pub trait PrintSurface {
    fn print(&mut self, doc: &Document, label: &str) -> Result<RenderSignal>;
}

/// Spools the document to a temporary file and runs a print command on it
pub struct SpoolPrinter {
    argv: Vec<String>,
    timeout: Duration,
    settle: Duration,
    /// Commands that outlived the timeout, with the spool file each is reading
    pending: Vec<(Child, PathBuf)>,
}

impl SpoolPrinter {
    /// `argv[0]` is the program; `{file}` in any argument becomes the spool path
    pub fn new(argv: Vec<String>, timeout: Duration, settle: Duration) -> Result<Self> {
        if argv.is_empty() {
            return Err(Error::Validation("print command is empty".to_string()));
        }
        Ok(Self {
            argv,
            timeout,
            settle,
            pending: Vec::new(),
        })
    }

    /// Collect timed-out commands that have since exited and delete their spool files
    pub fn reap(&mut self) {
        self.pending.retain_mut(|(child, path)| match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(spool = %path.display(), %status, "late print command finished");
                if let Err(e) = std::fs::remove_file(&*path) {
                    tracing::warn!(spool = %path.display(), error = %e, "failed to remove spool file");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(spool = %path.display(), error = %e, "cannot poll print command");
                false
            }
        });
    }

    fn args_for(&self, spool: &Path) -> Vec<String> {
        let path = spool.to_string_lossy();
        let mut substituted = false;
        let mut args: Vec<String> = self.argv[1..]
            .iter()
            .map(|arg| {
                if arg.contains("{file}") {
                    substituted = true;
                    arg.replace("{file}", &path)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(path.into_owned());
        }
        args
    }
}

impl PrintSurface for SpoolPrinter {
    fn print(&mut self, doc: &Document, label: &str) -> Result<RenderSignal> {
        self.reap();

        let mut spool = tempfile::Builder::new()
            .prefix("printdrop-")
            .suffix(".pdf")
            .tempfile()?;
        spool.write_all(&doc.bytes)?;
        spool.flush()?;

        // Let the file land before the spooler reads it
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }

        let program = &self.argv[0];
        let args = self.args_for(spool.path());
        tracing::info!(%label, %program, ?args, "sending to printer");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Print(format!("cannot start '{}': {}", program, e)))?;

        match child.wait_timeout(self.timeout)? {
            Some(status) if status.success() => {
                tracing::debug!(%label, "print command finished");
                Ok(RenderSignal::Completed)
            }
            Some(status) => Err(Error::Print(format!("'{}' exited with {}", program, status))),
            None => {
                // The command may still be reading the spool file
                let (_, path) = spool.keep().map_err(|e| Error::Io(e.error))?;
                tracing::warn!(
                    %label,
                    timeout_ms = self.timeout.as_millis() as u64,
                    spool = %path.display(),
                    "print command still running, continuing without completion signal"
                );
                self.pending.push((child, path));
                Ok(RenderSignal::TimedOut)
            }
        }
    }
}

impl Drop for SpoolPrinter {
    fn drop(&mut self) {
        self.reap();
        for (child, path) in &self.pending {
            tracing::warn!(
                pid = child.id(),
                spool = %path.display(),
                "print command still running at exit, leaving its spool file"
            );
        }
    }
}
