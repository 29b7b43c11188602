use std::sync::Arc;

use axum::Router;
use tillbot_agent::llm::{LlmClient, OpenAiCompatibleClient};
use tillbot_agent::{AgentRuntime, AgentSettings};
use tillbot_chat::events::{CategoryScope, ChannelMessageHandler, EventDispatcher};
use tillbot_chat::gateway::GatewayChatTransport;
use tillbot_chat::socket::{ChatRunner, ChatTransport, NoopChatTransport, ReconnectPolicy};
use tillbot_core::audit::TracingAuditSink;
use tillbot_core::config::{AppConfig, ConfigError, LoadOptions};
use tillbot_core::{
    AllocationError, DenominationCatalog, DeterministicQuoteRuntime, FixedRatePricingEngine,
};
use tillbot_core::cpq::pricing::PricingError;
use tillbot_db::{ConversationRepository, InMemoryConversationRepository};
use thiserror::Error;
use tracing::info;

use crate::admin::{self, AdminState};
use crate::health::{self, HealthState};
use crate::service::AgentMessageService;

pub struct Application {
    pub config: AppConfig,
    pub agent_runtime: Arc<AgentRuntime>,
    pub chat_runner: ChatRunner,
    pub transport: Arc<dyn ChatTransport>,
    pub repository: Arc<dyn ConversationRepository>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("pricing setup failed: {0}")]
    Pricing(#[from] PricingError),
    #[error("allocation setup failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("llm client setup failed: {0}")]
    Llm(String),
}

impl Application {
    /// Admin and health routes on one listener.
    pub fn router(&self) -> Router {
        let scope = CategoryScope::new(self.config.chat.category_id.clone());
        let admin = admin::router(AdminState::new(
            self.transport.clone(),
            scope,
            self.config.server.admin_secret.as_ref(),
        ));
        let health = health::router(HealthState {
            transport_mode: self.transport.mode(),
            assistant_configured: self.agent_runtime.assistant_configured(),
            repository: self.repository.clone(),
        });
        admin.merge(health)
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        "starting application bootstrap"
    );

    let pricing = FixedRatePricingEngine::new(config.pricing.rates())?;
    let quotes = DeterministicQuoteRuntime::new(
        pricing,
        DenominationCatalog::default(),
        config.pricing.max_quantity,
    )?;

    let assistant: Option<Arc<dyn LlmClient>> = if config.llm.is_enabled() {
        let client = OpenAiCompatibleClient::from_config(&config.llm)
            .map_err(|error| BootstrapError::Llm(error.to_string()))?;
        info!(
            event_name = "system.bootstrap.llm_configured",
            correlation_id = "bootstrap",
            conversation_id = "unknown",
            provider = ?config.llm.provider,
            model = %config.llm.model,
            "assistant enabled"
        );
        Some(Arc::new(client))
    } else {
        info!(
            event_name = "system.bootstrap.llm_disabled",
            correlation_id = "bootstrap",
            conversation_id = "unknown",
            "no llm key configured; assistant disabled"
        );
        None
    };

    let transport: Arc<dyn ChatTransport> = match &config.chat.bot_token {
        Some(token) => Arc::new(GatewayChatTransport::new(token.clone())),
        None => Arc::new(NoopChatTransport),
    };

    let repository: Arc<dyn ConversationRepository> =
        Arc::new(InMemoryConversationRepository::default());
    let agent_runtime = Arc::new(AgentRuntime::new(
        repository.clone(),
        Arc::new(quotes),
        assistant,
        Arc::new(TracingAuditSink),
        AgentSettings::from_config(&config),
    ));

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(ChannelMessageHandler::new(
        AgentMessageService::new(agent_runtime.clone()),
        CategoryScope::new(config.chat.category_id.clone()),
    ));
    let chat_runner = ChatRunner::new(transport.clone(), dispatcher, ReconnectPolicy::default());

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        transport_mode = transport.mode(),
        "application bootstrap complete"
    );

    Ok(Application { config, agent_runtime, chat_runner, transport, repository })
}
