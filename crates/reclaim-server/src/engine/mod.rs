//! The recovery engine: detection, scheduling, outcome tracking and
//! conversion reporting.
//!
//! Every pass is a stateless batch over the repository. Passes can overlap or
//! be fired twice; the repository's conditional updates decide which caller
//! wins a transition and the loser counts the item as skipped.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;

use reclaim_core::{
    config::Config,
    error::CoreError,
    repository::CartRepository,
    transport::{ConversionTransport, CredentialProvider, Mailer},
};

pub mod conversions;
pub mod detector;
pub mod outcome;
pub mod recovery;

/// Tunables for the passes, split out of [`Config`] so tests can build an
/// engine without touching the environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub abandon_threshold: chrono::Duration,
    pub detection_batch_size: i64,
    /// Per-user cap on carts examined in one scheduling pass.
    pub scheduling_batch_size: i64,
    pub reporter_concurrency: usize,
    pub external_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            abandon_threshold: chrono::Duration::minutes(15),
            detection_batch_size: 500,
            scheduling_batch_size: 200,
            reporter_concurrency: 4,
            external_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            abandon_threshold: config.abandon_threshold(),
            detection_batch_size: config.detection_batch_size,
            scheduling_batch_size: config.scheduling_batch_size,
            reporter_concurrency: config.reporter_concurrency.max(1),
            external_timeout: config.external_timeout(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionSummary {
    /// Checkout events examined.
    pub processed: usize,
    pub promoted: usize,
    /// Permanently ineligible events, marked processed and never retried.
    pub dropped: usize,
    /// Order events that moved a cart to `recovered`.
    pub recovered: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulingSummary {
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportingSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Reports whose claim was taken by another pass.
    pub skipped: usize,
    /// Users with pending reports but no usable credentials.
    pub users_skipped: usize,
}

pub struct Engine {
    pub(crate) repo: Arc<dyn CartRepository>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) transport: Arc<dyn ConversionTransport>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) settings: EngineSettings,
}

impl Engine {
    pub fn new(
        repo: Arc<dyn CartRepository>,
        mailer: Arc<dyn Mailer>,
        transport: Arc<dyn ConversionTransport>,
        credentials: Arc<dyn CredentialProvider>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repo,
            mailer,
            transport,
            credentials,
            settings,
        }
    }

    pub fn repository(&self) -> &Arc<dyn CartRepository> {
        &self.repo
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
