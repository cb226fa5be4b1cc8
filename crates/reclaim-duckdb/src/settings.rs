use anyhow::Result;
use chrono::Utc;
use duckdb::OptionalExt;
use reclaim_core::settings::{RecoverySettings, UserRecoverySettings};
use tracing::warn;

use crate::{rows::ts, DuckDbBackend};

impl DuckDbBackend {
    pub async fn get_recovery_settings(&self, user_id: &str) -> Result<Option<RecoverySettings>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT settings FROM recovery_settings WHERE user_id = ?1")?;
        let raw: Option<String> = stmt
            .query_row(duckdb::params![user_id], |row| row.get(0))
            .optional()?;
        raw.map(|blob| serde_json::from_str(&blob).map_err(anyhow::Error::from))
            .transpose()
    }

    pub async fn upsert_recovery_settings(
        &self,
        user_id: &str,
        settings: &RecoverySettings,
    ) -> Result<()> {
        let blob = serde_json::to_string(settings)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO recovery_settings (user_id, settings, updated_at)
            VALUES (?1, ?2, CAST(?3 AS TIMESTAMP))
            ON CONFLICT (user_id) DO UPDATE SET
                settings = EXCLUDED.settings,
                updated_at = EXCLUDED.updated_at
            "#,
            duckdb::params![user_id, blob, ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Users with recovery switched on. A row whose blob no longer parses is
    /// logged and left out so one bad row cannot stall every other user.
    pub async fn list_enabled_recovery_settings(&self) -> Result<Vec<UserRecoverySettings>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT user_id, settings FROM recovery_settings ORDER BY user_id")?;
        let mut out = Vec::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })? {
            let (user_id, blob) = row?;
            match serde_json::from_str::<RecoverySettings>(&blob) {
                Ok(settings) if settings.enabled => {
                    out.push(UserRecoverySettings { user_id, settings })
                }
                Ok(_) => {}
                Err(e) => warn!(user_id = %user_id, error = %e, "unreadable recovery settings"),
            }
        }
        Ok(out)
    }
}
