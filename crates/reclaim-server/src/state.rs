use std::sync::Arc;

use tracing::{info, warn};

use reclaim_core::{config::Config, normalize::EmailPolicy};
use reclaim_duckdb::DuckDbBackend;

use crate::{
    delivery::{FileCredentialProvider, MetaCapiTransport, SmtpMailer},
    engine::{Engine, EngineSettings},
};

/// Shared application state injected into every Axum handler and pass loop.
pub struct AppState {
    /// The DuckDB backend. Internally `Arc<tokio::sync::Mutex<Connection>>`.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup.
    pub config: Arc<Config>,

    pub engine: Arc<Engine>,

    /// Placeholder-address rules applied by the webhook normalizer.
    pub email_policy: EmailPolicy,
}

impl AppState {
    /// Assemble state around an already-built engine. The engine should sit on
    /// the same backend as `db`.
    pub fn new(db: Arc<DuckDbBackend>, config: Config, engine: Engine) -> Self {
        let email_policy = EmailPolicy::new(config.placeholder_emails.clone());
        Self {
            db,
            config: Arc::new(config),
            engine: Arc::new(engine),
            email_policy,
        }
    }

    /// Wire the production adapters: SMTP mailer, Meta Conversions API
    /// transport, and the file-backed credential provider.
    pub fn from_config(db: DuckDbBackend, config: Config) -> anyhow::Result<Self> {
        let db = Arc::new(db);
        let timeout = config.external_timeout();

        if config.smtp.noop {
            info!("SMTP noop mode enabled; recovery emails are logged, not sent");
        } else if config.smtp.host.is_none() {
            warn!("RECLAIM_SMTP_HOST is not set; every recovery send will fail");
        }

        let credentials = match config.meta.credentials_file.as_deref() {
            Some(path) => {
                let provider = FileCredentialProvider::load(path)?;
                info!(users = provider.len(), "ads credentials loaded");
                provider
            }
            None => {
                warn!("RECLAIM_META_CREDENTIALS_FILE is not set; conversion reporting skips every user");
                FileCredentialProvider::empty()
            }
        };

        let engine = Engine::new(
            db.clone(),
            Arc::new(SmtpMailer::new(config.smtp.clone(), timeout)),
            Arc::new(MetaCapiTransport::new(config.meta.graph_url.clone(), timeout)?),
            Arc::new(credentials),
            EngineSettings::from_config(&config),
        );
        Ok(Self::new(db, config, engine))
    }
}
