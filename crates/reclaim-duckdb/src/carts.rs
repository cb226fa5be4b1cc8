use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt};
use reclaim_core::cart::{AbandonedCart, CartStatus, NewAbandonedCart};

use crate::{
    backend::generate_cart_id,
    rows::{items_json, map_cart_row, ts, CART_COLUMNS},
    DuckDbBackend,
};

pub(crate) fn select_cart(conn: &Connection, cart_id: &str) -> Result<Option<AbandonedCart>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CART_COLUMNS} FROM abandoned_carts WHERE id = ?1"
    ))?;
    Ok(stmt
        .query_row(duckdb::params![cart_id], map_cart_row)
        .optional()?)
}

fn select_cart_by_platform_id(
    conn: &Connection,
    user_id: &str,
    platform_cart_id: &str,
) -> Result<Option<AbandonedCart>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CART_COLUMNS} FROM abandoned_carts WHERE user_id = ?1 AND platform_cart_id = ?2"
    ))?;
    Ok(stmt
        .query_row(duckdb::params![user_id, platform_cart_id], map_cart_row)
        .optional()?)
}

impl DuckDbBackend {
    /// Insert or refresh the cart keyed by `platform_cart_id`.
    ///
    /// Only an `abandoned` row is refreshed, and only its contents. The
    /// abandonment clock moves forward with a newer checkout event until the
    /// first email goes out; after that the sequence timing is fixed.
    pub async fn upsert_abandoned_cart(&self, cart: NewAbandonedCart) -> Result<AbandonedCart> {
        let items = items_json(&cart.cart_items)?;
        let now = ts(Utc::now());
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let existing: Option<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM abandoned_carts WHERE platform_cart_id = ?1")?;
            stmt.query_row(duckdb::params![cart.platform_cart_id], |row| row.get(0))
                .optional()?
        };

        let cart_id = match existing {
            Some(id) => {
                tx.execute(
                    r#"
                    UPDATE abandoned_carts
                    SET customer_email = COALESCE(?1, customer_email),
                        customer_name = COALESCE(?2, customer_name),
                        total_value = ?3,
                        currency = ?4,
                        cart_items = ?5,
                        checkout_url = COALESCE(?6, checkout_url),
                        source_event_id = ?7,
                        abandoned_at = CASE
                            WHEN recovery_emails_sent = 0
                                 AND CAST(?8 AS TIMESTAMP) > abandoned_at
                            THEN CAST(?8 AS TIMESTAMP)
                            ELSE abandoned_at
                        END,
                        updated_at = CAST(?9 AS TIMESTAMP)
                    WHERE id = ?10 AND status = 'abandoned'
                    "#,
                    duckdb::params![
                        cart.customer_email,
                        cart.customer_name,
                        cart.total_value,
                        cart.currency,
                        items,
                        cart.checkout_url,
                        cart.source_event_id,
                        ts(cart.abandoned_at),
                        now,
                        id,
                    ],
                )?;
                id
            }
            None => {
                let id = generate_cart_id();
                tx.execute(
                    r#"
                    INSERT INTO abandoned_carts (
                        id, platform_cart_id, user_id, integration_id,
                        customer_email, customer_name, total_value, currency,
                        cart_items, checkout_url, status, abandoned_at,
                        recovery_emails_sent, source_event_id, created_at, updated_at
                    ) VALUES (
                        ?1, ?2, ?3, ?4,
                        ?5, ?6, ?7, ?8,
                        ?9, ?10, 'abandoned', CAST(?11 AS TIMESTAMP),
                        0, ?12, CAST(?13 AS TIMESTAMP), CAST(?13 AS TIMESTAMP)
                    )
                    "#,
                    duckdb::params![
                        id,
                        cart.platform_cart_id,
                        cart.user_id,
                        cart.integration_id,
                        cart.customer_email,
                        cart.customer_name,
                        cart.total_value,
                        cart.currency,
                        items,
                        cart.checkout_url,
                        ts(cart.abandoned_at),
                        cart.source_event_id,
                        now,
                    ],
                )?;
                id
            }
        };

        let stored = select_cart(&tx, &cart_id)?
            .ok_or_else(|| anyhow!("cart {cart_id} not found after upsert"))?;
        tx.commit()?;
        Ok(stored)
    }

    pub async fn get_cart(&self, cart_id: &str) -> Result<Option<AbandonedCart>> {
        let conn = self.conn.lock().await;
        select_cart(&conn, cart_id)
    }

    /// The cart row of one upstream checkout, in any status.
    pub async fn find_cart_by_platform_id(
        &self,
        user_id: &str,
        platform_cart_id: &str,
    ) -> Result<Option<AbandonedCart>> {
        let conn = self.conn.lock().await;
        select_cart_by_platform_id(&conn, user_id, platform_cart_id)
    }

    pub async fn find_open_cart_for_order(
        &self,
        user_id: &str,
        platform_cart_id: &str,
        customer_email: Option<&str>,
    ) -> Result<Option<AbandonedCart>> {
        let conn = self.conn.lock().await;
        match select_cart_by_platform_id(&conn, user_id, platform_cart_id)? {
            Some(cart) if cart.status == CartStatus::Abandoned => return Ok(Some(cart)),
            // The order already recovered its own checkout; a redelivery must
            // not claim a second cart through the email match.
            Some(cart) if cart.status == CartStatus::Recovered => return Ok(None),
            _ => {}
        }
        let Some(email) = customer_email else {
            return Ok(None);
        };
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {CART_COLUMNS}
            FROM abandoned_carts
            WHERE user_id = ?1
              AND customer_email = ?2
              AND status = 'abandoned'
            ORDER BY abandoned_at DESC, id DESC
            LIMIT 1
            "#
        ))?;
        Ok(stmt
            .query_row(duckdb::params![user_id, email], map_cart_row)
            .optional()?)
    }

    pub async fn list_due_carts(
        &self,
        user_id: &str,
        abandoned_before: DateTime<Utc>,
        last_email_before: DateTime<Utc>,
        max_emails: u32,
        limit: i64,
    ) -> Result<Vec<AbandonedCart>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {CART_COLUMNS}
            FROM abandoned_carts
            WHERE user_id = ?1
              AND status = 'abandoned'
              AND abandoned_at <= CAST(?2 AS TIMESTAMP)
              AND (last_recovery_email_at IS NULL
                   OR last_recovery_email_at <= CAST(?3 AS TIMESTAMP))
              AND recovery_emails_sent < ?4
              AND customer_email IS NOT NULL
            ORDER BY abandoned_at ASC, id ASC
            LIMIT ?5
            "#
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(
            duckdb::params![
                user_id,
                ts(abandoned_before),
                ts(last_email_before),
                i64::from(max_emails),
                limit.max(1)
            ],
            map_cart_row,
        )? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn record_email_sent(
        &self,
        cart_id: &str,
        expected_sent: u32,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE abandoned_carts
            SET recovery_emails_sent = recovery_emails_sent + 1,
                last_recovery_email_at = CAST(?1 AS TIMESTAMP),
                updated_at = CAST(?1 AS TIMESTAMP)
            WHERE id = ?2 AND recovery_emails_sent = ?3
            "#,
            duckdb::params![ts(sent_at), cart_id, i64::from(expected_sent)],
        )?;
        Ok(changed > 0)
    }

    pub async fn mark_cart_recovered(
        &self,
        cart_id: &str,
        recovered_value: f64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE abandoned_carts
            SET status = 'recovered',
                recovered_at = CAST(?1 AS TIMESTAMP),
                recovered_value = ?2,
                updated_at = CAST(?1 AS TIMESTAMP)
            WHERE id = ?3 AND status = 'abandoned'
            "#,
            duckdb::params![ts(now), recovered_value, cart_id],
        )?;
        Ok(changed > 0)
    }

    pub async fn mark_cart_expired(&self, cart_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE abandoned_carts
            SET status = 'expired',
                updated_at = CAST(?1 AS TIMESTAMP)
            WHERE id = ?2 AND status = 'abandoned'
            "#,
            duckdb::params![ts(now), cart_id],
        )?;
        Ok(changed > 0)
    }
}
