use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use tillbot_agent::{AgentRuntime, InboundMessage};
use tillbot_chat::events::{
    ChannelMessageEvent, ChannelMessageService, EventContext, EventHandlerError,
};
use tillbot_core::domain::conversation::{ConversationId, CustomerId};

/// Routes ticket channel messages into the agent runtime.
pub struct AgentMessageService {
    runtime: Arc<AgentRuntime>,
}

impl AgentMessageService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ChannelMessageService for AgentMessageService {
    async fn handle_channel_message(
        &self,
        event: &ChannelMessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<String>, EventHandlerError> {
        let message = InboundMessage {
            conversation_id: ConversationId(event.channel_id.clone()),
            sender: CustomerId(event.author_id.clone()),
            text: event.text.clone(),
            correlation_id: ctx.correlation_id.clone(),
        };

        match self.runtime.handle_message(&message).await {
            Ok(reply) => Ok(reply.filter(|reply| !reply.trim().is_empty())),
            Err(error) => {
                let interface = error.into_interface(ctx.correlation_id.clone());
                warn!(
                    event_name = "agent.message.failed",
                    correlation_id = %ctx.correlation_id,
                    conversation_id = %event.channel_id,
                    error = %interface,
                    "message handling failed; record left unchanged"
                );
                Ok(Some(interface.user_message().to_owned()))
            }
        }
    }
}
