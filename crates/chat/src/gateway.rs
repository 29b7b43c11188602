//! Realtime transport over the chat platform's gateway.
//!
//! One shard task reads gateway events, keeps a channel cache warm, and turns
//! human-authored `MESSAGE_CREATE` events into [`ChatEnvelope`]s on an
//! unbounded queue that [`ChatTransport::next_envelope`] drains. Replies and
//! channel lookups go through the HTTP client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_gateway::{
    CloseFrame, Event, EventTypeFlags, Intents, MessageSender, Shard, ShardId, StreamExt,
};
use twilight_http::client::ClientBuilder;
use twilight_http::error::ErrorType;
use twilight_http::Client as HttpClient;
use twilight_model::gateway::payload::incoming::MessageCreate;
use twilight_model::id::marker::ChannelMarker;
use twilight_model::id::Id;

use crate::events::{ChannelMessageEvent, ChatEnvelope, ChatEvent};
use crate::socket::{ChannelInfo, ChatTransport, TransportError};

/// Longest message body the platform accepts.
pub const MESSAGE_CHAR_LIMIT: usize = 2_000;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn intents() -> Intents {
    Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT
}

/// State the shard task and the transport both read.
struct GatewayShared {
    http: HttpClient,
    cache: InMemoryCache,
}

struct GatewaySession {
    sender: MessageSender,
    task: JoinHandle<()>,
}

pub struct GatewayChatTransport {
    bot_token: SecretString,
    shared: Arc<GatewayShared>,
    inbound: Mutex<Option<UnboundedReceiver<ChatEnvelope>>>,
    session: Mutex<Option<GatewaySession>>,
    closing: AtomicBool,
}

impl GatewayChatTransport {
    pub fn new(bot_token: SecretString) -> Self {
        let http = ClientBuilder::new()
            .token(bot_token.expose_secret().to_owned())
            .timeout(HTTP_TIMEOUT)
            .build();
        let cache = InMemoryCache::builder().resource_types(ResourceType::CHANNEL).build();

        Self {
            bot_token,
            shared: Arc::new(GatewayShared { http, cache }),
            inbound: Mutex::new(None),
            session: Mutex::new(None),
            closing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChatTransport for GatewayChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut inbound = self.inbound.lock().await;
        if inbound.is_some() {
            debug!("gateway already connected; skipping");
            return Ok(());
        }

        let mut session = self.session.lock().await;
        if let Some(stale) = session.take() {
            stale.task.abort();
        }

        let (queue, receiver) = unbounded_channel();
        let shard = Shard::new(ShardId::ONE, self.bot_token.expose_secret().to_owned(), intents());
        let sender = shard.sender();
        let task = tokio::spawn(run_shard(shard, queue, Arc::clone(&self.shared)));

        *session = Some(GatewaySession { sender, task });
        *inbound = Some(receiver);
        self.closing.store(false, Ordering::SeqCst);
        info!(event_name = "ingress.gateway.started", "gateway shard started");
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        let Some(receiver) = inbound.as_mut() else {
            return self.end_of_stream("gateway is not connected");
        };
        if let Some(envelope) = receiver.recv().await {
            return Ok(Some(envelope));
        }

        *inbound = None;
        self.end_of_stream("gateway event loop ended")
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        let Some(id) = parse_channel_id(channel_id) else {
            return Err(TransportError::Send(format!("`{channel_id}` is not a channel id")));
        };

        for chunk in split_message(text, MESSAGE_CHAR_LIMIT) {
            self.shared.http.create_message(id).content(&chunk).await.map_err(|error| {
                warn!(channel_id, error = %error, "chat message post rejected");
                TransportError::Send(error.to_string())
            })?;
        }
        debug!(channel_id, "chat message posted");
        Ok(())
    }

    async fn channel_info(&self, channel_id: &str) -> Result<Option<ChannelInfo>, TransportError> {
        match parse_channel_id(channel_id) {
            Some(id) => self.shared.lookup(id).await,
            None => Ok(None),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // `inbound` may be held by a pending `next_envelope`, so only the
        // flag and the session are touched here.
        self.closing.store(true, Ordering::SeqCst);
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        if let Err(error) = session.sender.close(CloseFrame::NORMAL) {
            debug!(error = %error, "gateway shard already closed");
        }
        let abort = session.task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, session.task).await.is_err() {
            warn!(
                event_name = "ingress.gateway.close_timeout",
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "gateway shard did not close in time; aborting"
            );
            abort.abort();
        }
        info!(event_name = "ingress.gateway.stopped", "gateway shard stopped");
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "gateway"
    }
}

impl GatewayChatTransport {
    /// A closed queue is a clean end after `disconnect` and a failure otherwise,
    /// which sends the runner through its reconnect path.
    fn end_of_stream(&self, reason: &str) -> Result<Option<ChatEnvelope>, TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            Ok(None)
        } else {
            Err(TransportError::Receive(reason.to_owned()))
        }
    }
}

impl GatewayShared {
    async fn lookup(&self, id: Id<ChannelMarker>) -> Result<Option<ChannelInfo>, TransportError> {
        let cached = self.cache.channel(id).map(|channel| channel.parent_id);
        if let Some(parent_id) = cached {
            return Ok(Some(channel_info(id, parent_id)));
        }

        let response = match self.http.channel(id).await {
            Ok(response) => response,
            Err(error) if is_missing_channel(&error) => return Ok(None),
            Err(error) => return Err(TransportError::Lookup(error.to_string())),
        };
        let channel = response
            .model()
            .await
            .map_err(|error| TransportError::Lookup(format!("undecodable channel: {error}")))?;
        Ok(Some(channel_info(channel.id, channel.parent_id)))
    }

    async fn envelope_for(&self, message: &MessageCreate) -> ChatEnvelope {
        let parent_id = match self.lookup(message.channel_id).await {
            Ok(info) => info.and_then(|info| info.parent_id),
            Err(error) => {
                warn!(
                    event_name = "ingress.gateway.lookup_failed",
                    conversation_id = %message.channel_id,
                    error = %error,
                    "channel lookup failed; message treated as out of scope"
                );
                None
            }
        };

        channel_message_envelope(ChannelMessageEvent {
            channel_id: message.channel_id.to_string(),
            parent_id,
            author_id: message.author.id.to_string(),
            author_is_bot: message.author.bot,
            text: message.content.clone(),
            message_id: message.id.to_string(),
        })
    }
}

async fn run_shard(
    mut shard: Shard,
    queue: UnboundedSender<ChatEnvelope>,
    shared: Arc<GatewayShared>,
) {
    while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
        let event = match item {
            Ok(event) => event,
            Err(error) => {
                warn!(
                    event_name = "ingress.gateway.receive_failed",
                    error = %error,
                    "gateway read failed"
                );
                continue;
            }
        };
        shared.cache.update(&event);

        match event {
            Event::Ready(ready) => {
                info!(
                    event_name = "ingress.gateway.ready",
                    user_id = %ready.user.id,
                    "gateway ready"
                );
            }
            Event::MessageCreate(message) => {
                if message.author.bot {
                    trace!(message_id = %message.id, "ignoring bot message");
                    continue;
                }
                let envelope = shared.envelope_for(&message).await;
                if queue.send(envelope).is_err() {
                    debug!("envelope queue dropped; stopping shard loop");
                    break;
                }
            }
            _ => {}
        }
    }

    info!(event_name = "ingress.gateway.loop_ended", "gateway event loop ended");
}

fn channel_message_envelope(event: ChannelMessageEvent) -> ChatEnvelope {
    ChatEnvelope { envelope_id: event.message_id.clone(), event: ChatEvent::ChannelMessage(event) }
}

fn channel_info(id: Id<ChannelMarker>, parent_id: Option<Id<ChannelMarker>>) -> ChannelInfo {
    ChannelInfo {
        channel_id: id.to_string(),
        parent_id: parent_id.map(|parent| parent.to_string()),
    }
}

/// Platform ids are non-zero snowflakes.
fn parse_channel_id(raw: &str) -> Option<Id<ChannelMarker>> {
    raw.trim().parse::<u64>().ok().and_then(Id::new_checked)
}

fn is_missing_channel(error: &twilight_http::Error) -> bool {
    matches!(
        error.kind(),
        ErrorType::Response { status, .. } if matches!(status.get(), 403 | 404)
    )
}

/// Splits on line boundaries where possible so each part fits `limit` chars.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_owned()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                parts.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
impl GatewayChatTransport {
    /// Stands in for a live shard: whatever is pushed on the returned sender
    /// comes out of `next_envelope`.
    async fn attach_queue(&self) -> UnboundedSender<ChatEnvelope> {
        let (queue, receiver) = unbounded_channel();
        *self.inbound.lock().await = Some(receiver);
        queue
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use super::{
        channel_info, channel_message_envelope, parse_channel_id, split_message,
        GatewayChatTransport,
    };
    use crate::events::{
        CategoryScope, ChannelMessageEvent, ChannelMessageHandler, ChannelMessageService,
        ChatEvent, EventContext, EventDispatcher, EventHandlerError,
    };
    use crate::socket::{ChatRunner, ChatTransport, ReconnectPolicy, TransportError};

    struct CountingService {
        handled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelMessageService for CountingService {
        async fn handle_channel_message(
            &self,
            _event: &ChannelMessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<String>, EventHandlerError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn transport() -> Arc<GatewayChatTransport> {
        Arc::new(GatewayChatTransport::new(SecretString::from("bot-token".to_owned())))
    }

    fn ticket_message(message_id: &str, text: &str) -> ChannelMessageEvent {
        ChannelMessageEvent {
            channel_id: "1200000000000000001".to_owned(),
            parent_id: Some("1180000000000000000".to_owned()),
            author_id: "1100000000000000001".to_owned(),
            author_is_bot: false,
            text: text.to_owned(),
            message_id: message_id.to_owned(),
        }
    }

    #[tokio::test]
    async fn runner_keeps_handling_gateway_messages_until_disconnect() {
        let transport = transport();
        let queue = transport.attach_queue().await;
        let handled = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(ChannelMessageHandler::new(
            CountingService { handled: Arc::clone(&handled) },
            CategoryScope::new(Some("1180000000000000000".to_owned())),
        ));
        let runner = ChatRunner::new(
            transport.clone(),
            dispatcher,
            ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
        );
        let running = tokio::spawn(async move { runner.start().await });

        queue.send(channel_message_envelope(ticket_message("901", "hi"))).expect("queued");
        queue.send(channel_message_envelope(ticket_message("902", "700k"))).expect("queued");
        tokio::time::timeout(Duration::from_secs(2), async {
            while handled.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both messages handled");
        assert!(!running.is_finished(), "runner stopped while the gateway was open");

        transport.disconnect().await.expect("disconnect");
        drop(queue);
        let outcome = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("runner finished")
            .expect("runner task");
        assert!(outcome.is_ok());
        assert_eq!(handled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unexpected_end_of_stream_asks_for_reconnect() {
        let transport = transport();
        drop(transport.attach_queue().await);

        let error = transport.next_envelope().await.expect_err("closed without disconnect");
        assert!(matches!(error, TransportError::Receive(_)));

        transport.disconnect().await.expect("disconnect");
        assert_eq!(transport.next_envelope().await.expect("clean end"), None);
    }

    #[tokio::test]
    async fn malformed_channel_ids_are_not_found() {
        let transport = transport();

        assert_eq!(transport.channel_info("ticket-1").await.expect("lookup"), None);
        assert_eq!(transport.channel_info("0").await.expect("lookup"), None);
        assert!(matches!(
            transport.send_message("nope", "hi").await,
            Err(TransportError::Send(_))
        ));
        assert_eq!(transport.mode(), "gateway");
    }

    #[test]
    fn envelope_is_keyed_by_message_id() {
        let envelope = channel_message_envelope(ticket_message("903", "robux"));

        assert_eq!(envelope.envelope_id, "903");
        let ChatEvent::ChannelMessage(event) = envelope.event else {
            panic!("expected a channel message");
        };
        assert_eq!(event.parent_id.as_deref(), Some("1180000000000000000"));
    }

    #[test]
    fn channel_ids_parse_as_snowflakes() {
        let id = parse_channel_id(" 1200000000000000001 ").expect("valid id");
        let parent = parse_channel_id("1180000000000000000");

        let info = channel_info(id, parent);
        assert_eq!(info.channel_id, "1200000000000000001");
        assert_eq!(info.parent_id.as_deref(), Some("1180000000000000000"));
        assert!(parse_channel_id("-5").is_none());
    }

    #[test]
    fn short_messages_are_sent_whole() {
        let parts = split_message("Total **$15.75**", 2_000);

        assert_eq!(parts, vec!["Total **$15.75**".to_owned()]);
    }

    #[test]
    fn long_messages_split_on_lines() {
        let text = format!("{}\n{}\n", "a".repeat(6), "b".repeat(6));

        let parts = split_message(&text, 10);

        assert_eq!(parts, vec!["aaaaaa\n".to_owned(), "bbbbbb\n".to_owned()]);
    }

    #[test]
    fn oversized_line_is_hard_wrapped() {
        let parts = split_message(&"x".repeat(25), 10);

        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|part| part.chars().count() <= 10));
    }
}
