use anyhow::Result;
use chrono::Utc;
use reclaim_core::cart::{AbandonedCart, ConversionEventType};

use crate::{
    rows::{map_cart_row, ts, CART_COLUMNS},
    DuckDbBackend,
};

struct ReportColumns {
    sent: &'static str,
    event_id: &'static str,
    claim: &'static str,
}

fn report_columns(event_type: ConversionEventType) -> ReportColumns {
    match event_type {
        ConversionEventType::AddToCart => ReportColumns {
            sent: "capi_add_to_cart_sent",
            event_id: "capi_add_to_cart_event_id",
            claim: "capi_add_to_cart_claim",
        },
        ConversionEventType::Purchase => ReportColumns {
            sent: "capi_purchase_sent",
            event_id: "capi_purchase_event_id",
            claim: "capi_purchase_claim",
        },
    }
}

impl DuckDbBackend {
    /// Users owning at least one unreported, unclaimed conversion, the one
    /// waiting longest first.
    pub async fn list_pending_conversion_users(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id
            FROM abandoned_carts
            WHERE status = 'recovered'
              AND ((capi_add_to_cart_sent = FALSE AND capi_add_to_cart_claim IS NULL)
                OR (capi_purchase_sent = FALSE AND capi_purchase_claim IS NULL))
            GROUP BY user_id
            ORDER BY MIN(recovered_at) ASC, user_id ASC
            "#,
        )?;
        let mut out = Vec::new();
        for row in stmt.query_map([], |row| row.get::<_, String>(0))? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_pending_conversions(
        &self,
        user_id: &str,
        event_type: ConversionEventType,
        limit: i64,
    ) -> Result<Vec<AbandonedCart>> {
        let cols = report_columns(event_type);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {CART_COLUMNS}
            FROM abandoned_carts
            WHERE user_id = ?1
              AND status = 'recovered'
              AND {sent} = FALSE
              AND {claim} IS NULL
            ORDER BY recovered_at ASC, id ASC
            LIMIT ?2
            "#,
            sent = cols.sent,
            claim = cols.claim,
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(duckdb::params![user_id, limit.max(1)], map_cart_row)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn claim_conversion_report(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
    ) -> Result<bool> {
        let cols = report_columns(event_type);
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            &format!(
                r#"
                UPDATE abandoned_carts
                SET {claim_col} = ?1
                WHERE id = ?2
                  AND status = 'recovered'
                  AND {sent} = FALSE
                  AND {claim_col} IS NULL
                "#,
                claim_col = cols.claim,
                sent = cols.sent,
            ),
            duckdb::params![claim, cart_id],
        )?;
        Ok(changed > 0)
    }

    pub async fn complete_conversion_report(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
        external_event_id: &str,
    ) -> Result<bool> {
        let cols = report_columns(event_type);
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            &format!(
                r#"
                UPDATE abandoned_carts
                SET {sent} = TRUE,
                    {event_id} = ?1,
                    {claim_col} = NULL,
                    capi_error = NULL,
                    updated_at = CAST(?2 AS TIMESTAMP)
                WHERE id = ?3
                  AND {claim_col} = ?4
                  AND {sent} = FALSE
                "#,
                sent = cols.sent,
                event_id = cols.event_id,
                claim_col = cols.claim,
            ),
            duckdb::params![external_event_id, ts(Utc::now()), cart_id, claim],
        )?;
        Ok(changed > 0)
    }

    pub async fn release_conversion_claim(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
        error: &str,
    ) -> Result<()> {
        let cols = report_columns(event_type);
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                r#"
                UPDATE abandoned_carts
                SET {claim_col} = NULL,
                    capi_error = ?1
                WHERE id = ?2 AND {claim_col} = ?3
                "#,
                claim_col = cols.claim,
            ),
            duckdb::params![error, cart_id, claim],
        )?;
        Ok(())
    }
}
