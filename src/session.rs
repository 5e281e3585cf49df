//! Stored credential and the role gate in front of every command.
//!
//! This is not a security boundary: the server checks the bearer token on
//! every call. The guard only keeps people from running commands that cannot
//! succeed.

use crate::api::PrintShopApi;
use crate::error::Result;
use crate::models::Role;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Session {
    pub token: String,
    pub role: Role,
    pub username: String,
}

impl Session {
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let session: Session = serde_json::from_str(&content)?;
        Ok(Some(session))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn remove(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Not logged in. Run `printdrop login` first.")]
    NotLoggedIn,
    #[error("This command needs a {required} account; you are logged in as {actual}.")]
    WrongRole { required: Role, actual: Role },
}

/// Pass only when a session exists and carries the required role
pub fn require(session: Option<&Session>, role: Role) -> std::result::Result<&Session, GuardError> {
    let session = session.ok_or(GuardError::NotLoggedIn)?;
    if session.role != role {
        return Err(GuardError::WrongRole {
            required: role,
            actual: session.role,
        });
    }
    Ok(session)
}

/// Exchange credentials for a session
pub fn login(api: &dyn PrintShopApi, username: &str, password: &str) -> Result<Session> {
    let resp = api.login(username, password)?;
    tracing::info!(username, role = %resp.role, "logged in");
    Ok(Session {
        token: resp.token,
        role: resp.role,
        username: resp.username.unwrap_or_else(|| username.to_string()),
    })
}
