use crate::models::JobRef;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL log of what happened at the shop desk
pub struct Journal {
    pub path: PathBuf,
    desk_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    desk_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    job: String,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Journal {
    pub fn new(path: &Path, desk_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            desk_id: desk_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, job: &JobRef, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            desk_id: &self.desk_id,
            event_type,
            job: job.to_string(),
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn fetch_failed(&mut self, job: &JobRef, message: &str) -> Result<()> {
        self.log(
            "fetch_failed",
            job,
            serde_json::json!({ "message": message }),
        )
    }

    pub fn rendered(&mut self, job: &JobRef, bytes: usize, completed: bool) -> Result<()> {
        self.log(
            "rendered",
            job,
            serde_json::json!({ "bytes": bytes, "completed": completed }),
        )
    }

    pub fn confirmed(&mut self, job: &JobRef) -> Result<()> {
        self.log("confirmed", job, serde_json::json!({}))
    }

    pub fn declined(&mut self, job: &JobRef) -> Result<()> {
        self.log("declined", job, serde_json::json!({}))
    }

    pub fn confirm_failed(&mut self, job: &JobRef, message: &str) -> Result<()> {
        self.log(
            "confirm_failed",
            job,
            serde_json::json!({ "message": message }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_as_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("desk.jsonl");
        let job = JobRef::Code("AB12CD".to_string());

        let mut journal = Journal::new(&path, "desk-1").unwrap();
        journal.rendered(&job, 1024, true).unwrap();
        journal.confirmed(&job).unwrap();
        drop(journal);

        // Reopening appends rather than truncating
        let mut journal = Journal::new(&path, "desk-2").unwrap();
        journal.declined(&JobRef::Queue(4)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "rendered");
        assert_eq!(lines[0]["bytes"], 1024);
        assert_eq!(lines[0]["job"], "code AB12CD");
        assert_eq!(lines[1]["type"], "confirmed");
        assert_eq!(lines[2]["desk_id"], "desk-2");
        assert_eq!(lines[2]["job"], "queue job 4");
        assert!(lines[2]["ts"].is_string());
    }
}
