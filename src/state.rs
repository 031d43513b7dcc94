use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::{Config, LlmConfig};
use crate::store::MetadataStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<MetadataStore>,
    pub http_client: reqwest::Client,
    pub llm_config: Arc<RwLock<LlmConfig>>,
}

impl AppState {
    /// Opens the catalog pool; a connect failure here is fatal, the only
    /// error class that ever escapes to the process owner.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store =
            MetadataStore::connect(&config.db.connection_url(), config.db.max_connections).await?;

        let llm_config = config.llm.clone();

        Ok(Self {
            config,
            store: Arc::new(store),
            http_client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(120))
                .build()?,
            llm_config: Arc::new(RwLock::new(llm_config)),
        })
    }
}
