//! # Feature: Access Gate
//!
//! Per-user "has paid" flag kept in the database. When the gate is enforced,
//! job creation is refused for users without the flag.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.3.0
//! - **Toggleable**: true

use anyhow::Result;
use log::debug;

use crate::database::Database;
use crate::error::ReelError;

#[derive(Clone)]
pub struct AccessGate {
    database: Database,
    enforced: bool,
}

impl AccessGate {
    pub fn new(database: Database, enforced: bool) -> Self {
        AccessGate { database, enforced }
    }

    pub fn is_enforced(&self) -> bool {
        self.enforced
    }

    pub async fn grant(&self, user_id: &str) -> Result<()> {
        self.database.grant_access(validate_user(user_id)?).await
    }

    pub async fn revoke(&self, user_id: &str) -> Result<()> {
        self.database.revoke_access(validate_user(user_id)?).await
    }

    pub async fn has_access(&self, user_id: &str) -> Result<bool> {
        if !self.enforced {
            return Ok(true);
        }
        self.database.has_access(user_id.trim()).await
    }

    /// Err(`ReelError::AccessRequired`) when the gate is on and the user has no access.
    pub async fn require(&self, user_id: &str) -> Result<()> {
        if self.has_access(user_id).await? {
            Ok(())
        } else {
            debug!("Access denied for user {}", user_id);
            Err(ReelError::AccessRequired(user_id.to_string()).into())
        }
    }
}

fn validate_user(user_id: &str) -> Result<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        Err(ReelError::invalid("user id cannot be empty").into())
    } else {
        Ok(trimmed)
    }
}
