use crate::application::optimizer::RequestOptimizer;
use crate::application::prober::ConnectionProber;
use crate::domain::error::GateError;
use crate::infrastructure::config::Config;
use crate::infrastructure::network::http::create_client;
use crate::infrastructure::network::{PostgrestBackend, ReqwestTransport};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-wide wiring: one prober and one optimizer built from the config.
#[derive(Clone)]
pub struct AppState {
    pub optimizer: RequestOptimizer,
    pub prober: Arc<ConnectionProber>,
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, GateError> {
        if config.backend.url.is_empty() {
            return Err(GateError::Config(
                "backend.url is not configured".to_string(),
            ));
        }

        let http_client = create_client(&config.backend.user_agent)?;

        let backend = PostgrestBackend::new(
            http_client.clone(),
            config.backend.url.clone(),
            config.backend.api_key.clone(),
            config.backend.probe_table.clone(),
        );
        let prober = Arc::new(ConnectionProber::new(
            Arc::new(backend),
            config.prober.to_prober_config(),
        ));

        let mut transport = ReqwestTransport::new(http_client, config.backend.url.clone());
        if let Some(key) = config.backend.api_key.as_deref() {
            transport = transport.with_api_key(key);
        }
        let optimizer = RequestOptimizer::builder(Arc::new(transport))
            .config(config.optimizer.to_optimizer_config())
            .prober(Arc::clone(&prober))
            .build();

        Ok(Self {
            optimizer,
            prober,
            config: Arc::new(RwLock::new(config)),
        })
    }
}
