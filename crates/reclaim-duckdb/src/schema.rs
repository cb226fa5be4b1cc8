/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// Timestamps are stored as naive UTC `TIMESTAMP` values. Writers bind
/// `YYYY-MM-DD HH:MM:SS.ffffff` strings through `CAST(? AS TIMESTAMP)` and
/// readers select `CAST(col AS VARCHAR)`; see `rows.rs`.
///
/// Only primary keys and the cart upsert key are indexed. DuckDB rewrites an
/// UPDATE of an indexed column as delete + insert, which trips unique
/// constraints inside a transaction, so every mutable column stays unindexed.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- CHECKOUT EVENTS (normalized ingestion log, never deleted)
-- ===========================================
CREATE TABLE IF NOT EXISTS checkout_events (
    id                  VARCHAR PRIMARY KEY,           -- UUID v4
    integration_id      VARCHAR NOT NULL,
    user_id             VARCHAR NOT NULL,
    event_type          VARCHAR NOT NULL,              -- 'checkout_created' | 'checkout_updated' | 'order_created'
    platform_cart_id    VARCHAR NOT NULL,              -- upstream checkout token
    customer_email      VARCHAR,                       -- NULL when no usable address was captured
    customer_name       VARCHAR,
    line_items          VARCHAR NOT NULL,              -- JSON array of {{title, quantity, unit_price}}
    cart_value          DOUBLE NOT NULL,
    currency            VARCHAR(3) NOT NULL,
    checkout_url        VARCHAR,
    created_at          TIMESTAMP NOT NULL,
    processed           BOOLEAN NOT NULL DEFAULT FALSE
);

-- ===========================================
-- ABANDONED CARTS
-- ===========================================
-- Two independent sub-state-machines share this row:
--   recovery lifecycle: status, recovery_emails_sent, last_recovery_email_at
--   conversion reporting: capi_<type>_sent / _event_id / _claim, capi_error
CREATE TABLE IF NOT EXISTS abandoned_carts (
    id                          VARCHAR PRIMARY KEY,   -- 'cart_' + 21 alnum
    platform_cart_id            VARCHAR NOT NULL UNIQUE,
    user_id                     VARCHAR NOT NULL,
    integration_id              VARCHAR NOT NULL,
    customer_email              VARCHAR,
    customer_name               VARCHAR,
    total_value                 DOUBLE NOT NULL,
    currency                    VARCHAR(3) NOT NULL,
    cart_items                  VARCHAR NOT NULL,      -- JSON array, same shape as checkout_events.line_items
    checkout_url                VARCHAR,
    status                      VARCHAR NOT NULL DEFAULT 'abandoned',
    abandoned_at                TIMESTAMP NOT NULL,    -- source event time, not detection time
    recovery_emails_sent        INTEGER NOT NULL DEFAULT 0,
    last_recovery_email_at      TIMESTAMP,
    recovered_at                TIMESTAMP,
    recovered_value             DOUBLE,
    source_event_id             VARCHAR,
    capi_add_to_cart_sent       BOOLEAN NOT NULL DEFAULT FALSE,
    capi_add_to_cart_event_id   VARCHAR,
    capi_add_to_cart_claim      VARCHAR,
    capi_purchase_sent          BOOLEAN NOT NULL DEFAULT FALSE,
    capi_purchase_event_id      VARCHAR,
    capi_purchase_claim         VARCHAR,
    capi_error                  VARCHAR,
    created_at                  TIMESTAMP NOT NULL,
    updated_at                  TIMESTAMP NOT NULL
);

-- ===========================================
-- RECOVERY ACTIONS (one row per send attempt, never deleted)
-- ===========================================
CREATE TABLE IF NOT EXISTS recovery_actions (
    id                  VARCHAR PRIMARY KEY,           -- 'rca_' + 21 alnum
    cart_id             VARCHAR NOT NULL,
    checkout_event_id   VARCHAR,
    user_id             VARCHAR NOT NULL,
    email_number        INTEGER NOT NULL,              -- 1-based position in the cart's sequence
    recipient           VARCHAR NOT NULL,
    subject             VARCHAR,
    status              VARCHAR NOT NULL,              -- 'pending' | 'sent' | 'failed'
    error_message       VARCHAR,
    external_message_id VARCHAR,
    created_at          TIMESTAMP NOT NULL,
    sent_at             TIMESTAMP,
    opened              BOOLEAN NOT NULL DEFAULT FALSE,
    opened_at           TIMESTAMP,
    clicked             BOOLEAN NOT NULL DEFAULT FALSE,
    clicked_at          TIMESTAMP,
    converted           BOOLEAN NOT NULL DEFAULT FALSE,
    converted_at        TIMESTAMP,
    conversion_value    DOUBLE
);

-- ===========================================
-- RECOVERY SETTINGS (per-user JSON blob, written by the dashboard)
-- ===========================================
CREATE TABLE IF NOT EXISTS recovery_settings (
    user_id             VARCHAR PRIMARY KEY,
    settings            VARCHAR NOT NULL,
    updated_at          TIMESTAMP NOT NULL
);
"#
    )
}
