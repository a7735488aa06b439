//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::messaging::access::directory::{
    AgencyDirectory, InMemoryAgencyDirectory, InMemoryPropertyDirectory, PropertyDirectory,
};
use crate::messaging::core::config::MessagingConfig;
use crate::messaging::core::errors::MessagingResult;
use crate::messaging::engine::core::{MessagingBackends, MessagingEngine};
use crate::messaging::maintenance::purge::PurgeWorker;

/// Shared application state.
pub struct AppState {
    /// Messaging engine serving all routes.
    pub engine: MessagingEngine,
}

impl AppState {
    /// Create application state with the given collaborator directories.
    ///
    /// # Errors
    /// Returns an error if storage cannot be initialized or the
    /// configuration is invalid.
    pub async fn new(
        config: MessagingConfig,
        agencies: Arc<dyn AgencyDirectory>,
        properties: Arc<dyn PropertyDirectory>,
    ) -> MessagingResult<Arc<Self>> {
        let backends = MessagingBackends::sqlite(&config, agencies, properties).await?;
        let engine = MessagingEngine::new(config, backends)?;
        Ok(Arc::new(Self { engine }))
    }

    /// Create standalone state with empty in-memory directories.
    ///
    /// Used by the server binary when no platform directory services are
    /// wired in; deployments pass theirs through [`AppState::new`].
    ///
    /// # Errors
    /// Returns an error if storage cannot be initialized or the
    /// configuration is invalid.
    pub async fn standalone(config: MessagingConfig) -> MessagingResult<Arc<Self>> {
        Self::new(
            config,
            Arc::new(InMemoryAgencyDirectory::new()),
            Arc::new(InMemoryPropertyDirectory::new()),
        )
        .await
    }

    /// Build the background purge worker for this state's engine.
    #[must_use]
    pub fn purge_worker(&self) -> PurgeWorker {
        PurgeWorker::new(
            self.engine.store(),
            self.engine.bus().clone(),
            self.engine.config().purge.clone(),
        )
    }
}
