use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::services::engine::{ConversionEngine, EngineChain};
use crate::services::orchestrator::ConversionOrchestrator;
use crate::services::result_store::{ResultStore, RetentionPolicy};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: ResultStore,
    pub orchestrator: Arc<ConversionOrchestrator>,
}

impl AppState {
    /// State with the engine chain described by `config.conversion`.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let engine = Arc::new(EngineChain::from_config(&config.conversion));
        tracing::info!("Conversion engines: {:?}", engine.engine_names());
        Self::with_engine(config, engine).await
    }

    pub async fn with_engine(
        config: AppConfig,
        engine: Arc<dyn ConversionEngine>,
    ) -> anyhow::Result<Self> {
        let store = ResultStore::open(config.storage.artifact_dir())
            .await
            .context("Failed to create artifact directory")?;
        let orchestrator = Arc::new(ConversionOrchestrator::new(
            config.storage.staging_dir(),
            engine,
            store.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            orchestrator,
        })
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.config.retention.max_age())
    }
}
