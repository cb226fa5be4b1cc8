use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    /// Minimum age of a checkout event before it counts as abandoned.
    pub abandon_threshold_minutes: u32,
    pub scheduler_tick_seconds: u64,
    pub reporter_tick_seconds: u64,
    pub detection_batch_size: i64,
    /// Per-user cap on due carts examined in one scheduling pass.
    pub scheduling_batch_size: i64,
    pub reporter_batch_size: i64,
    pub reporter_concurrency: usize,
    pub external_timeout_seconds: u64,
    /// Bearer token required by the admin API. `None` leaves it open.
    pub admin_token: Option<String>,
    pub placeholder_emails: Vec<String>,
    pub smtp: SmtpConfig,
    pub meta: MetaConfig,
}

#[derive(Debug, Clone, Default)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Log instead of dispatching. For local runs and tests.
    pub noop: bool,
}

#[derive(Debug, Clone)]
pub struct MetaConfig {
    pub graph_url: String,
    pub credentials_file: Option<String>,
}

pub const DEFAULT_META_GRAPH_URL: &str = "https://graph.facebook.com/v19.0";

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let trimmed = v.trim();
            trimmed.eq_ignore_ascii_case("1")
                || trimmed.eq_ignore_ascii_case("true")
                || trimmed.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            abandon_threshold_minutes: 15,
            scheduler_tick_seconds: 300,
            reporter_tick_seconds: 600,
            detection_batch_size: 500,
            scheduling_batch_size: 200,
            reporter_batch_size: 50,
            reporter_concurrency: 4,
            external_timeout_seconds: 10,
            admin_token: None,
            placeholder_emails: Vec::new(),
            smtp: SmtpConfig {
                port: 587,
                ..SmtpConfig::default()
            },
            meta: MetaConfig {
                graph_url: DEFAULT_META_GRAPH_URL.to_string(),
                credentials_file: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            port: std::env::var("RECLAIM_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("RECLAIM_DATA_DIR").unwrap_or(defaults.data_dir),
            duckdb_memory_limit: std::env::var("RECLAIM_DUCKDB_MEMORY")
                .unwrap_or(defaults.duckdb_memory_limit),
            abandon_threshold_minutes: env_parse(
                "RECLAIM_ABANDON_THRESHOLD_MINUTES",
                defaults.abandon_threshold_minutes,
            )
            .clamp(1, 24 * 60),
            scheduler_tick_seconds: env_parse(
                "RECLAIM_SCHEDULER_TICK_SECONDS",
                defaults.scheduler_tick_seconds,
            )
            .clamp(10, 3600),
            reporter_tick_seconds: env_parse(
                "RECLAIM_REPORTER_TICK_SECONDS",
                defaults.reporter_tick_seconds,
            )
            .clamp(10, 3600),
            detection_batch_size: env_parse(
                "RECLAIM_DETECTION_BATCH_SIZE",
                defaults.detection_batch_size,
            )
            .clamp(1, 5000),
            scheduling_batch_size: env_parse(
                "RECLAIM_SCHEDULING_BATCH_SIZE",
                defaults.scheduling_batch_size,
            )
            .clamp(1, 5000),
            reporter_batch_size: env_parse(
                "RECLAIM_REPORTER_BATCH_SIZE",
                defaults.reporter_batch_size,
            )
            .clamp(1, 500),
            reporter_concurrency: env_parse(
                "RECLAIM_REPORTER_CONCURRENCY",
                defaults.reporter_concurrency,
            )
            .clamp(1, 32),
            external_timeout_seconds: env_parse(
                "RECLAIM_EXTERNAL_TIMEOUT_SECONDS",
                defaults.external_timeout_seconds,
            )
            .clamp(1, 120),
            admin_token: env_opt("RECLAIM_ADMIN_TOKEN"),
            placeholder_emails: std::env::var("RECLAIM_PLACEHOLDER_EMAILS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            smtp: SmtpConfig {
                host: env_opt("RECLAIM_SMTP_HOST"),
                port: env_parse("RECLAIM_SMTP_PORT", 587),
                username: env_opt("RECLAIM_SMTP_USERNAME"),
                password: env_opt("RECLAIM_SMTP_PASSWORD"),
                noop: env_flag("RECLAIM_SMTP_NOOP"),
            },
            meta: MetaConfig {
                graph_url: env_opt("RECLAIM_META_GRAPH_URL")
                    .unwrap_or_else(|| DEFAULT_META_GRAPH_URL.to_string()),
                credentials_file: env_opt("RECLAIM_META_CREDENTIALS_FILE"),
            },
        })
    }

    pub fn abandon_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.abandon_threshold_minutes))
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_seconds)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds)
    }

    pub fn reporter_tick(&self) -> Duration {
        Duration::from_secs(self.reporter_tick_seconds)
    }
}
