use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    ChannelMessage(ChannelMessageEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::ChannelMessage(_) => ChatEventType::ChannelMessage,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    ChannelMessage,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessageEvent {
    pub channel_id: String,
    /// Category the channel sits in, when the transport knows it.
    pub parent_id: Option<String>,
    pub author_id: String,
    pub author_is_bot: bool,
    pub text: String,
    pub message_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(String),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("channel message handler failure: {0}")]
    ChannelMessage(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

/// Which channels the bot answers in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryScope {
    category_id: Option<String>,
}

impl CategoryScope {
    pub fn new(category_id: Option<String>) -> Self {
        Self { category_id: category_id.filter(|id| !id.trim().is_empty()) }
    }

    pub fn category_id(&self) -> Option<&str> {
        self.category_id.as_deref()
    }

    /// An unset category matches nothing.
    pub fn qualifies(&self, parent_id: Option<&str>) -> bool {
        match (self.category_id.as_deref(), parent_id) {
            (Some(category), Some(parent)) => category == parent,
            _ => false,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
pub trait ChannelMessageService: Send + Sync {
    /// Returns the reply to post, or `None` when nothing should be said.
    async fn handle_channel_message(
        &self,
        event: &ChannelMessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<String>, EventHandlerError>;
}

pub struct ChannelMessageHandler<S> {
    service: S,
    scope: CategoryScope,
}

impl<S> ChannelMessageHandler<S>
where
    S: ChannelMessageService,
{
    pub fn new(service: S, scope: CategoryScope) -> Self {
        Self { service, scope }
    }
}

#[async_trait]
impl<S> EventHandler for ChannelMessageHandler<S>
where
    S: ChannelMessageService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::ChannelMessage
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::ChannelMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        if event.author_is_bot || !self.scope.qualifies(event.parent_id.as_deref()) {
            return Ok(HandlerResult::Ignored);
        }

        let reply = self.service.handle_channel_message(event, ctx).await?;
        Ok(match reply {
            Some(reply) => HandlerResult::Responded(reply),
            None => HandlerResult::Processed,
        })
    }
}

#[derive(Default)]
pub struct NoopChannelMessageService;

#[async_trait]
impl ChannelMessageService for NoopChannelMessageService {
    async fn handle_channel_message(
        &self,
        _event: &ChannelMessageEvent,
        _ctx: &EventContext,
    ) -> Result<Option<String>, EventHandlerError> {
        Ok(None)
    }
}
