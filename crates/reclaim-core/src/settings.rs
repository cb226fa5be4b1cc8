use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const MAX_DELAY_HOURS: u32 = 24 * 30;
const MAX_INTERVAL_HOURS: u32 = 24 * 30;
const MAX_EMAILS: u32 = 10;

/// Per-user recovery-email configuration.
///
/// Owned by the user through the dashboard; the engine only reads it.
/// Stored as a JSON blob, so every field has a default and unknown fields
/// written by newer dashboards are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub enabled: bool,
    /// Minimum cart age before the first email.
    pub delay_hours: u32,
    /// Minimum spacing between two emails for the same cart.
    pub interval_hours: u32,
    pub max_emails: u32,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub reply_to: Option<String>,
    pub logo_url: Option<String>,
    pub custom_message: Option<String>,
    pub discount_code: Option<String>,
    pub store_name: Option<String>,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_hours: 1,
            interval_hours: 24,
            max_emails: 3,
            sender_email: None,
            sender_name: None,
            reply_to: None,
            logo_url: None,
            custom_message: None,
            discount_code: None,
            store_name: None,
        }
    }
}

impl RecoverySettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.delay_hours > MAX_DELAY_HOURS {
            return Err(CoreError::Validation(format!(
                "delay_hours must be {MAX_DELAY_HOURS} or fewer"
            )));
        }
        if self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(CoreError::Validation(format!(
                "interval_hours must be {MAX_INTERVAL_HOURS} or fewer"
            )));
        }
        if self.max_emails > MAX_EMAILS {
            return Err(CoreError::Validation(format!(
                "max_emails must be {MAX_EMAILS} or fewer"
            )));
        }
        if self.enabled
            && self
                .sender_email
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(CoreError::Validation(
                "sender_email is required when recovery is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.delay_hours))
    }

    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.interval_hours))
    }
}

/// Settings row as listed by the repository for a scheduling pass.
#[derive(Debug, Clone)]
pub struct UserRecoverySettings {
    pub user_id: String,
    pub settings: RecoverySettings,
}
