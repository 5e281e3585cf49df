//! Client-local state with explicit load and save points.

use crate::favorites::Favorites;
use crate::session::Session;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Directory holding session, favorites, journal and line-editor history
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.printdrop`, or `.printdrop` in the working directory without a home
    pub fn default_location() -> Self {
        match dirs::home_dir() {
            Some(home) => Self::new(home.join(".printdrop")),
            None => Self::new(".printdrop"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self) -> PathBuf {
        self.root.join("session.json")
    }

    pub fn favorites(&self) -> PathBuf {
        self.root.join("favorites.json")
    }

    pub fn journal(&self) -> PathBuf {
        self.root.join("desk.jsonl")
    }

    pub fn line_history(&self) -> PathBuf {
        self.root.join("history.txt")
    }
}

/// Everything the client persists between runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalState {
    pub session: Option<Session>,
    pub favorites: Favorites,
}

impl LocalState {
    /// Read at startup. A damaged session file counts as logged out.
    pub fn load(dir: &StateDir) -> Self {
        let session = match Session::load(&dir.session()) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable session file");
                None
            }
        };
        Self {
            session,
            favorites: Favorites::load(&dir.favorites()),
        }
    }

    /// Write back at shutdown
    pub fn save(&self, dir: &StateDir) -> Result<()> {
        std::fs::create_dir_all(dir.root())?;
        match &self.session {
            Some(session) => session.save(&dir.session())?,
            None => Session::remove(&dir.session())?,
        }
        self.favorites.save(&dir.favorites())?;
        Ok(())
    }
}
