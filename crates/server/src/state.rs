//! Shared application state handed to every connection handler.

use std::sync::Arc;

use gateway_config::Settings;
use gateway_llm::LlmBackend;

use crate::registry::SessionRegistry;
use crate::sweeper::ResourceManager;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub resource_manager: Arc<ResourceManager>,
    pub llm_backend: Arc<dyn LlmBackend>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<SessionRegistry>,
        resource_manager: Arc<ResourceManager>,
        llm_backend: Arc<dyn LlmBackend>,
    ) -> Self {
        Self {
            settings,
            registry,
            resource_manager,
            llm_backend,
        }
    }
}
