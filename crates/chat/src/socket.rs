use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{
    ChatEnvelope, ChatEvent, DispatchError, EventContext, EventDispatcher, HandlerResult,
};

pub const HANDLER_FAILURE_REPLY: &str =
    "Something went wrong handling that message. Please try again.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("channel lookup failed: {0}")]
    Lookup(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub parent_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the inbound stream has closed.
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), TransportError>;
    /// `Ok(None)` when the channel does not exist or is not visible.
    async fn channel_info(&self, channel_id: &str) -> Result<Option<ChannelInfo>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    fn mode(&self) -> &'static str;
}

/// Used when no bot token is configured: no inbound events, no channels.
#[derive(Default)]
pub struct NoopChatTransport;

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(None)
    }

    async fn send_message(&self, channel_id: &str, _text: &str) -> Result<(), TransportError> {
        Err(TransportError::Send(format!("no chat transport configured for channel {channel_id}")))
    }

    async fn channel_info(&self, _channel_id: &str) -> Result<Option<ChannelInfo>, TransportError> {
        Ok(None)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "noop"
    }
}

pub struct ChatRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl Default for ChatRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopChatTransport),
            dispatcher: EventDispatcher::default(),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl ChatRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "chat transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "chat transport retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        let mode = self.transport.mode();
        info!(attempt, mode, "opening chat transport connection");
        self.transport.connect().await?;
        info!(attempt, mode, "chat transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, mode, "chat transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            self.handle_envelope(&envelope).await;
        }
    }

    async fn handle_envelope(&self, envelope: &ChatEnvelope) {
        let channel_id = channel_of(envelope);
        info!(
            event_name = "ingress.chat.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %envelope.envelope_id,
            conversation_id = channel_id.unwrap_or("unknown"),
            "received chat envelope"
        );

        let context = EventContext { correlation_id: envelope.envelope_id.clone() };
        let reply = match self.dispatcher.dispatch(envelope, &context).await {
            Ok(HandlerResult::Responded(reply)) => Some(reply),
            Ok(result) => {
                debug!(
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    result = ?result,
                    "chat envelope produced no reply"
                );
                None
            }
            Err(error) => {
                warn!(
                    event_name = "ingress.chat.dispatch_failed",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    conversation_id = channel_id.unwrap_or("unknown"),
                    error = %error,
                    "event dispatch failed; continuing chat loop"
                );
                Some(HANDLER_FAILURE_REPLY.to_owned())
            }
        };

        let (Some(reply), Some(channel_id)) = (reply, channel_id) else {
            return;
        };
        if let Err(error) = self.transport.send_message(channel_id, &reply).await {
            warn!(
                event_name = "egress.chat.reply_failed",
                correlation_id = %envelope.envelope_id,
                conversation_id = channel_id,
                error = %error,
                "failed to deliver reply"
            );
        } else {
            debug!(
                event_name = "egress.chat.reply_sent",
                correlation_id = %envelope.envelope_id,
                conversation_id = channel_id,
                "reply delivered"
            );
        }
    }
}

fn channel_of(envelope: &ChatEnvelope) -> Option<&str> {
    match &envelope.event {
        ChatEvent::ChannelMessage(event) => Some(event.channel_id.as_str()),
        ChatEvent::Unsupported { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{
        ChannelInfo, ChatRunner, ChatTransport, ReconnectPolicy, TransportError,
        HANDLER_FAILURE_REPLY,
    };
    use crate::events::{
        CategoryScope, ChannelMessageEvent, ChannelMessageHandler, ChannelMessageService,
        ChatEnvelope, ChatEvent, EventContext, EventDispatcher, EventHandlerError,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChatEnvelope>, TransportError>>,
        connect_attempts: usize,
        sent: Vec<(String, String)>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChatEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn sent(&self) -> Vec<(String, String)> {
            self.state.lock().await.sent.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.sent.push((channel_id.to_owned(), text.to_owned()));
            Ok(())
        }

        async fn channel_info(
            &self,
            channel_id: &str,
        ) -> Result<Option<ChannelInfo>, TransportError> {
            Ok(Some(ChannelInfo {
                channel_id: channel_id.to_owned(),
                parent_id: Some("TICKETS".to_owned()),
            }))
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }

        fn mode(&self) -> &'static str {
            "scripted"
        }
    }

    struct ScriptedService;

    #[async_trait]
    impl ChannelMessageService for ScriptedService {
        async fn handle_channel_message(
            &self,
            event: &ChannelMessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<String>, EventHandlerError> {
            match event.text.as_str() {
                "boom" => Err(EventHandlerError::ChannelMessage("exploded".to_owned())),
                "quiet" => Ok(None),
                text => Ok(Some(format!("got {text}"))),
            }
        }
    }

    fn dispatcher() -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(ChannelMessageHandler::new(
            ScriptedService,
            CategoryScope::new(Some("TICKETS".to_owned())),
        ));
        dispatcher
    }

    fn channel_message(id: &str, text: &str) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(Some(ChatEnvelope {
            envelope_id: id.to_owned(),
            event: ChatEvent::ChannelMessage(ChannelMessageEvent {
                channel_id: "C1".to_owned(),
                parent_id: Some("TICKETS".to_owned()),
                author_id: "U1".to_owned(),
                author_is_bot: false,
                text: text.to_owned(),
                message_id: format!("msg-{id}"),
            }),
        }))
    }

    fn no_delay() -> ReconnectPolicy {
        ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(ChatEnvelope {
                    envelope_id: "env-1".to_owned(),
                    event: ChatEvent::Unsupported { event_type: "typing_start".to_owned() },
                })),
                Ok(None),
            ],
        ));

        let runner = ChatRunner::new(transport.clone(), EventDispatcher::default(), no_delay());

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.disconnect_calls().await, 1);
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = ChatRunner::new(transport.clone(), EventDispatcher::default(), no_delay());

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn replies_are_sent_and_handler_failures_are_contained() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                channel_message("env-1", "700k"),
                channel_message("env-2", "boom"),
                channel_message("env-3", "quiet"),
                channel_message("env-4", "robux"),
                Ok(None),
            ],
        ));

        let runner = ChatRunner::new(transport.clone(), dispatcher(), no_delay());
        runner.start().await.expect("runner");

        assert_eq!(
            transport.sent().await,
            vec![
                ("C1".to_owned(), "got 700k".to_owned()),
                ("C1".to_owned(), HANDLER_FAILURE_REPLY.to_owned()),
                ("C1".to_owned(), "got robux".to_owned()),
            ]
        );
    }

    #[test]
    fn backoff_is_capped() {
        let policy = ReconnectPolicy { max_retries: 10, base_delay_ms: 250, max_delay_ms: 5_000 };

        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(2).as_millis(), 1_000);
        assert_eq!(policy.backoff(9).as_millis(), 5_000);
    }
}
