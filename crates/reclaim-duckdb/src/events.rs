use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::OptionalExt;
use reclaim_core::event::CheckoutEvent;

use crate::{
    rows::{items_json, map_event_row, ts, EVENT_COLUMNS},
    DuckDbBackend,
};

impl DuckDbBackend {
    pub async fn insert_checkout_event(&self, event: &CheckoutEvent) -> Result<()> {
        let line_items = items_json(&event.line_items)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO checkout_events (
                id, integration_id, user_id, event_type, platform_cart_id,
                customer_email, customer_name, line_items, cart_value, currency,
                checkout_url, created_at, processed
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, CAST(?12 AS TIMESTAMP), ?13
            )
            "#,
            duckdb::params![
                event.id,
                event.integration_id,
                event.user_id,
                event.event_type.as_str(),
                event.platform_cart_id,
                event.customer_email,
                event.customer_name,
                line_items,
                event.cart_value,
                event.currency,
                event.checkout_url,
                ts(event.created_at),
                event.processed,
            ],
        )?;
        Ok(())
    }

    pub async fn get_checkout_event(&self, event_id: &str) -> Result<Option<CheckoutEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM checkout_events WHERE id = ?1"
        ))?;
        Ok(stmt
            .query_row(duckdb::params![event_id], map_event_row)
            .optional()?)
    }

    pub async fn list_unprocessed_checkout_events(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CheckoutEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM checkout_events
            WHERE processed = FALSE
              AND event_type IN ('checkout_created', 'checkout_updated')
              AND created_at <= CAST(?1 AS TIMESTAMP)
            ORDER BY created_at ASC, id ASC
            LIMIT ?2
            "#
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(
            duckdb::params![ts(created_before), limit.max(1)],
            map_event_row,
        )? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_unprocessed_order_events(&self, limit: i64) -> Result<Vec<CheckoutEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM checkout_events
            WHERE processed = FALSE
              AND event_type = 'order_created'
            ORDER BY created_at ASC, id ASC
            LIMIT ?1
            "#
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(duckdb::params![limit.max(1)], map_event_row)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn mark_event_processed(&self, event_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE checkout_events SET processed = TRUE WHERE id = ?1 AND processed = FALSE",
            duckdb::params![event_id],
        )?;
        Ok(changed > 0)
    }

    pub async fn mark_cart_events_processed(
        &self,
        user_id: &str,
        platform_cart_id: &str,
    ) -> Result<usize> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE checkout_events
            SET processed = TRUE
            WHERE user_id = ?1
              AND platform_cart_id = ?2
              AND processed = FALSE
              AND event_type IN ('checkout_created', 'checkout_updated')
            "#,
            duckdb::params![user_id, platform_cart_id],
        )?;
        Ok(changed)
    }
}
