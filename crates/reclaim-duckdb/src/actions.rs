use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt};
use reclaim_core::cart::{ActionOutcome, EngagementKind, NewRecoveryAction, RecoveryAction};

use crate::{
    backend::generate_action_id,
    rows::{map_action_row, ts, ACTION_COLUMNS},
    DuckDbBackend,
};

fn select_action(conn: &Connection, action_id: &str) -> Result<Option<RecoveryAction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACTION_COLUMNS} FROM recovery_actions WHERE id = ?1"
    ))?;
    Ok(stmt
        .query_row(duckdb::params![action_id], map_action_row)
        .optional()?)
}

impl DuckDbBackend {
    pub async fn has_action_for_event(&self, checkout_event_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT COUNT(*) FROM recovery_actions WHERE checkout_event_id = ?1")?;
        let count: i64 = stmt.query_row(duckdb::params![checkout_event_id], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Claim the right to send email `email_number` for a cart.
    ///
    /// The cart check, the duplicate check and the insert of the `pending`
    /// row run in one transaction under the connection lock. A `failed`
    /// action does not block a later claim for the same number.
    pub async fn claim_recovery_send(
        &self,
        action: NewRecoveryAction,
    ) -> Result<Option<RecoveryAction>> {
        if action.email_number == 0 {
            return Err(anyhow!("email_number is 1-based"));
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let cart_ready: i64 = {
            let mut stmt = tx.prepare(
                r#"
                SELECT COUNT(*)
                FROM abandoned_carts
                WHERE id = ?1
                  AND status = 'abandoned'
                  AND recovery_emails_sent = ?2
                "#,
            )?;
            stmt.query_row(
                duckdb::params![action.cart_id, i64::from(action.email_number - 1)],
                |row| row.get(0),
            )?
        };
        if cart_ready == 0 {
            return Ok(None);
        }

        let in_flight: i64 = {
            let mut stmt = tx.prepare(
                r#"
                SELECT COUNT(*)
                FROM recovery_actions
                WHERE cart_id = ?1
                  AND email_number = ?2
                  AND status IN ('pending', 'sent')
                "#,
            )?;
            stmt.query_row(
                duckdb::params![action.cart_id, i64::from(action.email_number)],
                |row| row.get(0),
            )?
        };
        if in_flight > 0 {
            return Ok(None);
        }

        let id = generate_action_id();
        tx.execute(
            r#"
            INSERT INTO recovery_actions (
                id, cart_id, checkout_event_id, user_id, email_number,
                recipient, subject, status, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, 'pending', CAST(?8 AS TIMESTAMP)
            )
            "#,
            duckdb::params![
                id,
                action.cart_id,
                action.checkout_event_id,
                action.user_id,
                i64::from(action.email_number),
                action.recipient,
                action.subject,
                ts(action.created_at),
            ],
        )?;
        let stored = select_action(&tx, &id)?
            .ok_or_else(|| anyhow!("recovery action {id} not found after insert"))?;
        tx.commit()?;
        Ok(Some(stored))
    }

    pub async fn complete_recovery_action(
        &self,
        action_id: &str,
        outcome: ActionOutcome,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = match outcome {
            ActionOutcome::Sent {
                external_message_id,
                sent_at,
            } => conn.execute(
                r#"
                UPDATE recovery_actions
                SET status = 'sent',
                    sent_at = CAST(?1 AS TIMESTAMP),
                    external_message_id = ?2,
                    error_message = NULL
                WHERE id = ?3 AND status = 'pending'
                "#,
                duckdb::params![ts(sent_at), external_message_id, action_id],
            )?,
            ActionOutcome::Failed { error } => conn.execute(
                r#"
                UPDATE recovery_actions
                SET status = 'failed',
                    error_message = ?1
                WHERE id = ?2 AND status = 'pending'
                "#,
                duckdb::params![error, action_id],
            )?,
        };
        Ok(changed > 0)
    }

    pub async fn get_action(&self, action_id: &str) -> Result<Option<RecoveryAction>> {
        let conn = self.conn.lock().await;
        select_action(&conn, action_id)
    }

    pub async fn list_actions_for_cart(&self, cart_id: &str) -> Result<Vec<RecoveryAction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {ACTION_COLUMNS}
            FROM recovery_actions
            WHERE cart_id = ?1
            ORDER BY email_number ASC, created_at ASC, id ASC
            "#
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(duckdb::params![cart_id], map_action_row)? {
            out.push(row?);
        }
        Ok(out)
    }

    /// Engagement only lands on delivered emails. A click implies an open.
    pub async fn record_engagement(
        &self,
        action_id: &str,
        kind: EngagementKind,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = match kind {
            EngagementKind::Opened => {
                r#"
                UPDATE recovery_actions
                SET opened = TRUE,
                    opened_at = CAST(?1 AS TIMESTAMP)
                WHERE id = ?2 AND status = 'sent' AND opened = FALSE
                "#
            }
            EngagementKind::Clicked => {
                r#"
                UPDATE recovery_actions
                SET clicked = TRUE,
                    clicked_at = CAST(?1 AS TIMESTAMP),
                    opened = TRUE,
                    opened_at = COALESCE(opened_at, CAST(?1 AS TIMESTAMP))
                WHERE id = ?2 AND status = 'sent' AND clicked = FALSE
                "#
            }
        };
        let conn = self.conn.lock().await;
        let changed = conn.execute(sql, duckdb::params![ts(now), action_id])?;
        Ok(changed > 0)
    }

    pub async fn mark_latest_action_converted(
        &self,
        cart_id: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let latest: Option<String> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id
                FROM recovery_actions
                WHERE cart_id = ?1 AND status = 'sent'
                ORDER BY email_number DESC, sent_at DESC
                LIMIT 1
                "#,
            )?;
            stmt.query_row(duckdb::params![cart_id], |row| row.get(0))
                .optional()?
        };
        let Some(action_id) = latest else {
            return Ok(false);
        };
        let changed = tx.execute(
            r#"
            UPDATE recovery_actions
            SET converted = TRUE,
                converted_at = CAST(?1 AS TIMESTAMP),
                conversion_value = ?2
            WHERE id = ?3 AND converted = FALSE
            "#,
            duckdb::params![ts(now), value, action_id],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }
}
