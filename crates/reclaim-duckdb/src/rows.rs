use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use reclaim_core::{
    cart::{AbandonedCart, CartStatus, RecoveryAction, RecoveryActionStatus},
    event::{CheckoutEvent, CheckoutEventType, LineItem},
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TS_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Bind form of a timestamp, for `CAST(? AS TIMESTAMP)`.
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.format(TS_FORMAT).to_string()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TS_PARSE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| anyhow!("invalid timestamp {raw:?}: {e}"))
}

fn conversion_failure(idx: usize, message: String) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(
        idx,
        duckdb::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn get_ts(row: &duckdb::Row<'_>, idx: usize) -> Result<DateTime<Utc>, duckdb::Error> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_failure(idx, e.to_string()))
}

fn get_opt_ts(row: &duckdb::Row<'_>, idx: usize) -> Result<Option<DateTime<Utc>>, duckdb::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(&r).map_err(|e| conversion_failure(idx, e.to_string())))
        .transpose()
}

fn get_u32(row: &duckdb::Row<'_>, idx: usize) -> Result<u32, duckdb::Error> {
    let raw: i64 = row.get(idx)?;
    u32::try_from(raw).map_err(|e| conversion_failure(idx, e.to_string()))
}

fn get_items(row: &duckdb::Row<'_>, idx: usize) -> Result<Vec<LineItem>, duckdb::Error> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_failure(idx, e.to_string()))
}

pub(crate) fn items_json(items: &[LineItem]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}

pub(crate) const EVENT_COLUMNS: &str = r#"
    id,
    integration_id,
    user_id,
    event_type,
    platform_cart_id,
    customer_email,
    customer_name,
    line_items,
    cart_value,
    currency,
    checkout_url,
    CAST(created_at AS VARCHAR),
    processed
"#;

pub(crate) fn map_event_row(row: &duckdb::Row<'_>) -> Result<CheckoutEvent, duckdb::Error> {
    let event_type_raw: String = row.get(3)?;
    let event_type = CheckoutEventType::parse(&event_type_raw)
        .map_err(|e| conversion_failure(3, e.to_string()))?;
    Ok(CheckoutEvent {
        id: row.get(0)?,
        integration_id: row.get(1)?,
        user_id: row.get(2)?,
        event_type,
        platform_cart_id: row.get(4)?,
        customer_email: row.get(5)?,
        customer_name: row.get(6)?,
        line_items: get_items(row, 7)?,
        cart_value: row.get(8)?,
        currency: row.get(9)?,
        checkout_url: row.get(10)?,
        created_at: get_ts(row, 11)?,
        processed: row.get(12)?,
    })
}

pub(crate) const CART_COLUMNS: &str = r#"
    id,
    platform_cart_id,
    user_id,
    integration_id,
    customer_email,
    customer_name,
    total_value,
    currency,
    cart_items,
    checkout_url,
    status,
    CAST(abandoned_at AS VARCHAR),
    recovery_emails_sent,
    CAST(last_recovery_email_at AS VARCHAR),
    CAST(recovered_at AS VARCHAR),
    recovered_value,
    source_event_id,
    capi_add_to_cart_sent,
    capi_add_to_cart_event_id,
    capi_purchase_sent,
    capi_purchase_event_id,
    capi_error,
    CAST(created_at AS VARCHAR),
    CAST(updated_at AS VARCHAR)
"#;

pub(crate) fn map_cart_row(row: &duckdb::Row<'_>) -> Result<AbandonedCart, duckdb::Error> {
    let status_raw: String = row.get(10)?;
    let status =
        CartStatus::parse(&status_raw).map_err(|e| conversion_failure(10, e.to_string()))?;
    Ok(AbandonedCart {
        id: row.get(0)?,
        platform_cart_id: row.get(1)?,
        user_id: row.get(2)?,
        integration_id: row.get(3)?,
        customer_email: row.get(4)?,
        customer_name: row.get(5)?,
        total_value: row.get(6)?,
        currency: row.get(7)?,
        cart_items: get_items(row, 8)?,
        checkout_url: row.get(9)?,
        status,
        abandoned_at: get_ts(row, 11)?,
        recovery_emails_sent: get_u32(row, 12)?,
        last_recovery_email_at: get_opt_ts(row, 13)?,
        recovered_at: get_opt_ts(row, 14)?,
        recovered_value: row.get(15)?,
        source_event_id: row.get(16)?,
        capi_add_to_cart_sent: row.get(17)?,
        capi_add_to_cart_event_id: row.get(18)?,
        capi_purchase_sent: row.get(19)?,
        capi_purchase_event_id: row.get(20)?,
        capi_error: row.get(21)?,
        created_at: get_ts(row, 22)?,
        updated_at: get_ts(row, 23)?,
    })
}

pub(crate) const ACTION_COLUMNS: &str = r#"
    id,
    cart_id,
    checkout_event_id,
    user_id,
    email_number,
    recipient,
    subject,
    status,
    error_message,
    external_message_id,
    CAST(created_at AS VARCHAR),
    CAST(sent_at AS VARCHAR),
    opened,
    CAST(opened_at AS VARCHAR),
    clicked,
    CAST(clicked_at AS VARCHAR),
    converted,
    CAST(converted_at AS VARCHAR),
    conversion_value
"#;

pub(crate) fn map_action_row(row: &duckdb::Row<'_>) -> Result<RecoveryAction, duckdb::Error> {
    let status_raw: String = row.get(7)?;
    let status = RecoveryActionStatus::parse(&status_raw)
        .map_err(|e| conversion_failure(7, e.to_string()))?;
    Ok(RecoveryAction {
        id: row.get(0)?,
        cart_id: row.get(1)?,
        checkout_event_id: row.get(2)?,
        user_id: row.get(3)?,
        email_number: get_u32(row, 4)?,
        recipient: row.get(5)?,
        subject: row.get(6)?,
        status,
        error_message: row.get(8)?,
        external_message_id: row.get(9)?,
        created_at: get_ts(row, 10)?,
        sent_at: get_opt_ts(row, 11)?,
        opened: row.get(12)?,
        opened_at: get_opt_ts(row, 13)?,
        clicked: row.get(14)?,
        clicked_at: get_opt_ts(row, 15)?,
        converted: row.get(16)?,
        converted_at: get_opt_ts(row, 17)?,
        conversion_value: row.get(18)?,
    })
}
