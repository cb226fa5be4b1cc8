use std::{collections::HashMap, path::Path};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reclaim_core::transport::{ConversionCredentials, CredentialError, CredentialProvider};

/// Per-user ads credentials read once from a JSON object keyed by user id.
///
/// ```json
/// { "user_1": { "pixel_id": "123", "access_token": "EAAB...", "expires_at": null } }
/// ```
#[derive(Debug, Default)]
pub struct FileCredentialProvider {
    entries: HashMap<String, ConversionCredentials>,
}

impl FileCredentialProvider {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading credentials file {}", path.display()))?;
        let entries: HashMap<String, ConversionCredentials> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing credentials file {}", path.display()))?;
        Ok(Self { entries })
    }

    /// No credentials at all: every user is skipped by the reporter.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, ConversionCredentials>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn credentials_for(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversionCredentials, CredentialError> {
        let creds = self
            .entries
            .get(user_id)
            .ok_or_else(|| CredentialError::Missing(user_id.to_string()))?;
        if creds.pixel_id.trim().is_empty() {
            return Err(CredentialError::Unconfigured(user_id.to_string()));
        }
        if creds.access_token.trim().is_empty() {
            return Err(CredentialError::Missing(user_id.to_string()));
        }
        if creds.is_expired(now) {
            return Err(CredentialError::Expired(user_id.to_string()));
        }
        Ok(creds.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::Duration;

    use super::*;

    fn creds(pixel: &str, token: &str, expires_at: Option<DateTime<Utc>>) -> ConversionCredentials {
        ConversionCredentials {
            pixel_id: pixel.to_string(),
            access_token: token.to_string(),
            expires_at,
            test_event_code: None,
        }
    }

    #[tokio::test]
    async fn lookup_outcomes() {
        let now = Utc::now();
        let provider = FileCredentialProvider::from_entries(HashMap::from([
            ("ok".to_string(), creds("px", "tok", None)),
            ("no_pixel".to_string(), creds(" ", "tok", None)),
            ("no_token".to_string(), creds("px", "", None)),
            ("stale".to_string(), creds("px", "tok", Some(now - Duration::minutes(1)))),
        ]));

        assert_eq!(
            provider.credentials_for("ok", now).await.expect("ok").pixel_id,
            "px"
        );
        assert!(matches!(
            provider.credentials_for("no_pixel", now).await,
            Err(CredentialError::Unconfigured(_))
        ));
        assert!(matches!(
            provider.credentials_for("no_token", now).await,
            Err(CredentialError::Missing(_))
        ));
        assert!(matches!(
            provider.credentials_for("stale", now).await,
            Err(CredentialError::Expired(_))
        ));
        assert!(matches!(
            provider.credentials_for("nobody", now).await,
            Err(CredentialError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn loads_a_json_file() {
        let path = std::env::temp_dir().join(format!(
            "reclaim-creds-{}.json",
            uuid::Uuid::new_v4().simple()
        ));
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(
            br#"{"user_1":{"pixel_id":"123","access_token":"abc","test_event_code":"TEST9"}}"#,
        )
        .expect("write");

        let provider = FileCredentialProvider::load(&path).expect("load");
        assert_eq!(provider.len(), 1);
        let found = provider
            .credentials_for("user_1", Utc::now())
            .await
            .expect("creds");
        assert_eq!(found.test_event_code.as_deref(), Some("TEST9"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        assert!(FileCredentialProvider::load("/nonexistent/reclaim-creds.json").is_err());
    }
}
