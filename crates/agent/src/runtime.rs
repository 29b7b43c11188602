use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tillbot_core::audit::{AuditOutcome, AuditScope, AuditSink};
use tillbot_core::config::AppConfig;
use tillbot_core::cpq::amount::has_amount_hint;
use tillbot_core::cpq::pricing::format_quantity;
use tillbot_core::cpq::QuoteRuntime;
use tillbot_core::domain::conversation::{
    ConversationId, ConversationRecord, CustomerId, PaymentMethod, Role, HISTORY_LIMIT,
};
use tillbot_core::domain::quote::Quote;
use tillbot_core::errors::{ApplicationError, DomainError};
use tillbot_core::flows::{
    ConversationStage, FlowAction, FlowContext, FlowEngine, FlowEvent, TicketFlow,
};
use tillbot_db::ConversationRepository;

use crate::conversation::{
    detect_payment_method, is_pay_intent, is_reset, InterpretationChain, InterpretationScope,
    ResolvedAmount,
};
use crate::llm::{ChatTurn, LlmClient};

pub const AMOUNT_PROMPT: &str = "How much game money do you want to buy?";
pub const AMOUNT_REPROMPT: &str = "Say an amount like `700k`, `1m`, or `max money`.";
pub const ASSISTANT_UNAVAILABLE: &str = "AI temporarily unavailable.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub sender: CustomerId,
    pub text: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug)]
pub struct AgentSettings {
    /// Display name of the points currency, e.g. "Robux".
    pub points_label: String,
    pub cashapp_link: Option<String>,
    pub paypal_link: Option<String>,
    /// History entries sent along with each assistant request.
    pub history_limit: usize,
    pub llm_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            points_label: "Robux".to_owned(),
            cashapp_link: None,
            paypal_link: None,
            history_limit: HISTORY_LIMIT,
            llm_timeout: Duration::from_secs(20),
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            points_label: config.pricing.points_label.clone(),
            cashapp_link: config.payments.cashapp_link.clone(),
            paypal_link: config.payments.paypal_link.clone(),
            history_limit: config.llm.history_limit.min(HISTORY_LIMIT),
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

struct Classified {
    event: FlowEvent,
    amount: Option<ResolvedAmount>,
}

impl Classified {
    fn event(event: FlowEvent) -> Self {
        Self { event, amount: None }
    }

    fn resolved(amount: ResolvedAmount) -> Self {
        Self { event: FlowEvent::AmountResolved, amount: Some(amount) }
    }
}

pub struct AgentRuntime {
    repository: Arc<dyn ConversationRepository>,
    quotes: Arc<dyn QuoteRuntime>,
    flow: FlowEngine<TicketFlow>,
    interpreters: InterpretationChain,
    assistant: Option<Arc<dyn LlmClient>>,
    audit: Arc<dyn AuditSink>,
    settings: AgentSettings,
}

impl AgentRuntime {
    pub fn new(
        repository: Arc<dyn ConversationRepository>,
        quotes: Arc<dyn QuoteRuntime>,
        assistant: Option<Arc<dyn LlmClient>>,
        audit: Arc<dyn AuditSink>,
        settings: AgentSettings,
    ) -> Self {
        let interpreters = InterpretationChain::standard(assistant.clone(), settings.llm_timeout);
        Self {
            repository,
            quotes,
            flow: FlowEngine::default(),
            interpreters,
            assistant,
            audit,
            settings,
        }
    }

    pub fn with_interpreters(mut self, interpreters: InterpretationChain) -> Self {
        self.interpreters = interpreters;
        self
    }

    pub fn assistant_configured(&self) -> bool {
        self.assistant.is_some()
    }

    pub fn repository(&self) -> &Arc<dyn ConversationRepository> {
        &self.repository
    }

    /// Handles one inbound message and returns the reply to post, if any.
    ///
    /// The conversation's slot stays locked for the whole call, external
    /// requests included. Changes are made on a copy and only stored once
    /// every action has succeeded.
    pub async fn handle_message(
        &self,
        message: &InboundMessage,
    ) -> Result<Option<String>, ApplicationError> {
        let slot = self.repository.slot(&message.conversation_id).await;
        let mut guard = slot.lock().await;
        let audit =
            AuditScope::new(message.conversation_id.clone(), message.correlation_id.clone());

        let existing = match guard.as_ref() {
            None => None,
            Some(record) if !record.is_customer(&message.sender) => {
                debug!(
                    event_name = "ingress.message.ignored",
                    correlation_id = %message.correlation_id,
                    conversation_id = %message.conversation_id.0,
                    "message from someone other than the ticket customer"
                );
                return Ok(None);
            }
            Some(record) => Some(record.clone()),
        };

        let Some(mut working) = existing else {
            let record =
                ConversationRecord::new(message.conversation_id.clone(), message.sender.clone());
            self.audit.emit(
                audit
                    .event("conversation.created", AuditOutcome::Success)
                    .detail("customer_id", record.customer_id.0.clone()),
            );
            info!(
                event_name = "ingress.conversation.created",
                correlation_id = %message.correlation_id,
                conversation_id = %message.conversation_id.0,
                "conversation opened"
            );
            *guard = Some(record);
            return Ok(Some(AMOUNT_PROMPT.to_owned()));
        };

        let reply = self.process(&mut working, &message.text, &audit).await?;
        *guard = Some(working);
        Ok(Some(reply))
    }

    async fn process(
        &self,
        record: &mut ConversationRecord,
        text: &str,
        audit: &AuditScope,
    ) -> Result<String, ApplicationError> {
        let classified = self.classify(record.stage(), text).await;
        let context = FlowContext { quantity_set: record.quantity.is_some() };
        let outcome = self
            .flow
            .apply_with_audit(
                record.stage(),
                &classified.event,
                &context,
                self.audit.as_ref(),
                audit,
            )
            .map_err(DomainError::from)?;
        record.advance(&outcome)?;

        info!(
            event_name = "flow.transition.applied",
            correlation_id = %audit.correlation_id,
            conversation_id = %record.id.0,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            event = ?outcome.event,
            "conversation advanced"
        );

        let mut replies = Vec::new();
        for action in &outcome.actions {
            if let Some(reply) = self.perform(action, record, text, &classified, audit).await? {
                replies.push(reply);
            }
        }
        Ok(replies.join("\n\n"))
    }

    async fn classify(&self, stage: ConversationStage, text: &str) -> Classified {
        if is_reset(text) {
            return Classified::event(FlowEvent::ResetRequested);
        }

        match stage {
            ConversationStage::AskAmount => {
                match self.interpreters.resolve(text, InterpretationScope::All).await {
                    Some(amount) => Classified::resolved(amount),
                    None => Classified::event(FlowEvent::AmountUnresolved),
                }
            }
            ConversationStage::AskPayment => match detect_payment_method(text) {
                Some(PaymentMethod::Points) => Classified::event(FlowEvent::PointsSelected),
                Some(PaymentMethod::Cash) => Classified::event(FlowEvent::CashSelected),
                None => Classified::event(FlowEvent::PaymentUnrecognized),
            },
            ConversationStage::Done => {
                if let Some(amount) =
                    self.interpreters.resolve(text, InterpretationScope::LocalOnly).await
                {
                    return Classified::resolved(amount);
                }
                if is_pay_intent(text) {
                    return Classified::event(FlowEvent::PaymentInfoRequested);
                }
                // Small talk goes straight to the assistant; only amount-like
                // text is worth an extraction round trip.
                if !has_amount_hint(text) {
                    return Classified::event(FlowEvent::FreeTextReceived);
                }
                if let Some(amount) =
                    self.interpreters.resolve(text, InterpretationScope::RemoteOnly).await
                {
                    return Classified::resolved(amount);
                }
                Classified::event(FlowEvent::FreeTextReceived)
            }
        }
    }

    async fn perform(
        &self,
        action: &FlowAction,
        record: &mut ConversationRecord,
        text: &str,
        classified: &Classified,
        audit: &AuditScope,
    ) -> Result<Option<String>, ApplicationError> {
        let reply = match action {
            FlowAction::ClearRecord => {
                record.reset();
                None
            }
            FlowAction::StoreQuantity => {
                let amount = classified.amount.ok_or_else(|| {
                    DomainError::InvariantViolation("amount event without an amount".to_owned())
                })?;
                let max_quantity = self.quotes.max_quantity();
                let quantity = amount.amount.clamp_to(max_quantity);
                record.set_quantity(quantity, max_quantity)?;
                debug!(
                    correlation_id = %audit.correlation_id,
                    conversation_id = %record.id.0,
                    quantity,
                    source = amount.source,
                    "quantity stored"
                );
                None
            }
            FlowAction::AskForAmount => Some(AMOUNT_PROMPT.to_owned()),
            FlowAction::RepromptAmount => Some(AMOUNT_REPROMPT.to_owned()),
            FlowAction::AskForPayment => Some(format!(
                "Paying with **real money** or **{}**?",
                self.settings.points_label
            )),
            FlowAction::RepromptPayment => {
                Some(format!("Say **real money** or **{}**.", self.settings.points_label))
            }
            FlowAction::QuoteCash => {
                Some(self.emit_quote(record, PaymentMethod::Cash, audit)?)
            }
            FlowAction::QuotePoints => {
                Some(self.emit_quote(record, PaymentMethod::Points, audit)?)
            }
            FlowAction::ResendLastQuote => {
                let quote = record.last_quote.as_ref().ok_or_else(|| {
                    DomainError::InvariantViolation("done stage without a quote".to_owned())
                })?;
                Some(self.render_quote(quote))
            }
            FlowAction::ForwardToAssistant => Some(self.converse(record, text, audit).await),
        };
        Ok(reply)
    }

    fn emit_quote(
        &self,
        record: &mut ConversationRecord,
        method: PaymentMethod,
        audit: &AuditScope,
    ) -> Result<String, ApplicationError> {
        let quantity = record.quantity.ok_or_else(|| {
            DomainError::InvariantViolation("quote requested without a quantity".to_owned())
        })?;
        let quote = self.quotes.quote(quantity, method).map_err(DomainError::from)?;

        let total = match &quote {
            Quote::Cash(cash) => cash.display_total(),
            Quote::Points(points) => points.total_points().to_string(),
        };
        self.audit.emit(
            audit
                .event("pricing.quote_emitted", AuditOutcome::Success)
                .detail("method", format!("{method:?}"))
                .detail("requested_quantity", quantity.to_string())
                .detail("quoted_quantity", quote.quantity().to_string())
                .detail("total", total),
        );

        let reply = self.render_quote(&quote);
        record.record_quote(quote)?;
        Ok(reply)
    }

    fn render_quote(&self, quote: &Quote) -> String {
        match quote {
            Quote::Cash(cash) => {
                let mut lines = vec![format!("Total: **${}**", cash.display_total())];
                if let Some(link) = &self.settings.cashapp_link {
                    lines.push(format!("Cash App: {link}"));
                }
                if let Some(link) = &self.settings.paypal_link {
                    lines.push(format!("PayPal: {link}"));
                }
                lines.join("\n")
            }
            Quote::Points(points) => {
                let label = &self.settings.points_label;
                let plan = &points.plan;
                let mut reply = format!("Total: **{} {label}**", plan.total_points);
                if plan.adjusted() {
                    reply.push_str(&format!(
                        "\nAdjusted to {} game money so it matches the available passes.",
                        format_quantity(plan.adjusted_quantity)
                    ));
                }
                reply.push_str("\n\n");
                let lines: Vec<String> = plan
                    .line_items
                    .iter()
                    .map(|item| {
                        format!("• {} {label} – {}", item.unit_size, item.redemption_link)
                    })
                    .collect();
                reply.push_str(&lines.join("\n"));
                reply
            }
        }
    }

    async fn converse(
        &self,
        record: &mut ConversationRecord,
        text: &str,
        audit: &AuditScope,
    ) -> String {
        let Some(client) = &self.assistant else {
            return ASSISTANT_UNAVAILABLE.to_owned();
        };

        let system = self.system_prompt(record);
        let history_len = record.history_len();
        let mut turns: Vec<ChatTurn> = record
            .history()
            .skip(history_len.saturating_sub(self.settings.history_limit))
            .map(|entry| ChatTurn { role: entry.role, content: entry.text.clone() })
            .collect();
        turns.push(ChatTurn::user(text));

        match tokio::time::timeout(self.settings.llm_timeout, client.chat(&system, &turns)).await {
            Ok(Ok(reply)) => {
                record.push_history(Role::User, text);
                record.push_history(Role::Assistant, &reply);
                self.audit.emit(audit.event("assistant.reply_generated", AuditOutcome::Success));
                reply
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "assistant.reply.failed",
                    correlation_id = %audit.correlation_id,
                    conversation_id = %record.id.0,
                    error = %error,
                    "assistant request failed"
                );
                self.emit_assistant_failure(audit, error.to_string());
                ASSISTANT_UNAVAILABLE.to_owned()
            }
            Err(_) => {
                warn!(
                    event_name = "assistant.reply.timed_out",
                    correlation_id = %audit.correlation_id,
                    conversation_id = %record.id.0,
                    timeout_ms = self.settings.llm_timeout.as_millis() as u64,
                    "assistant request timed out"
                );
                self.emit_assistant_failure(audit, "timeout".to_owned());
                ASSISTANT_UNAVAILABLE.to_owned()
            }
        }
    }

    fn emit_assistant_failure(&self, audit: &AuditScope, reason: String) {
        self.audit.emit(
            audit.event("assistant.reply_failed", AuditOutcome::Failed).detail("reason", reason),
        );
    }

    fn system_prompt(&self, record: &ConversationRecord) -> String {
        let label = &self.settings.points_label;
        let order = match &record.last_quote {
            Some(Quote::Cash(cash)) => format!(
                "{} game money for ${} in real money",
                format_quantity(cash.quantity),
                cash.display_total()
            ),
            Some(Quote::Points(points)) => format!(
                "{} game money for {} {label}",
                format_quantity(points.quantity()),
                points.total_points()
            ),
            None => "no quote yet".to_owned(),
        };

        format!(
            "You are the helper in a support ticket where a customer buys in-game money. \
             Their current order: {order}. Never invent prices, totals or links. \
             To change the amount they just type it (for example 700k), and `restart` starts over. \
             Keep replies short and friendly."
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tillbot_core::audit::InMemoryAuditSink;
    use tillbot_core::cpq::allocation::AllocationError;
    use tillbot_core::cpq::catalog::DenominationCatalog;
    use tillbot_core::cpq::pricing::FixedRatePricingEngine;
    use tillbot_core::cpq::{DeterministicQuoteRuntime, QuoteRuntime};
    use tillbot_core::domain::conversation::{
        ConversationId, CustomerId, PaymentMethod, HISTORY_LIMIT,
    };
    use tillbot_core::domain::quote::{CashQuote, PointsQuote};
    use tillbot_core::errors::ApplicationError;
    use tillbot_core::flows::ConversationStage;
    use tillbot_db::{ConversationRepository, InMemoryConversationRepository};
    use tokio::sync::Mutex;

    use super::{
        AgentRuntime, AgentSettings, InboundMessage, AMOUNT_PROMPT, AMOUNT_REPROMPT,
        ASSISTANT_UNAVAILABLE,
    };
    use crate::llm::{ChatTurn, LlmClient};

    const TICKET: &str = "ticket-1";
    const CUSTOMER: &str = "customer-1";

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String>>>,
        requests: Mutex<Vec<(String, Vec<ChatTurn>)>>,
    }

    impl ScriptedLlm {
        fn with_replies(replies: Vec<Result<String>>) -> Self {
            Self { replies: Mutex::new(replies.into()), requests: Mutex::default() }
        }

        async fn requests(&self) -> Vec<(String, Vec<ChatTurn>)> {
            self.requests.lock().await.clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, system: &str, turns: &[ChatTurn]) -> Result<String> {
            self.requests.lock().await.push((system.to_owned(), turns.to_vec()));
            let next = self.replies.lock().await.pop_front();
            next.unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn chat(&self, _system: &str, _turns: &[ChatTurn]) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("too late".to_owned())
        }
    }

    /// Answers after `delay`, inside the runtime's timeout.
    struct DelayedLlm {
        delay: Duration,
    }

    #[async_trait]
    impl LlmClient for DelayedLlm {
        async fn chat(&self, _system: &str, turns: &[ChatTurn]) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            let last = turns.last().map(|turn| turn.content.as_str()).unwrap_or_default();
            Ok(format!("re: {last}"))
        }
    }

    struct BrokenPointsRuntime;

    impl QuoteRuntime for BrokenPointsRuntime {
        fn max_quantity(&self) -> u64 {
            1_750_000
        }

        fn cash_quote(&self, quantity: u64) -> CashQuote {
            CashQuote { quantity, total: Default::default() }
        }

        fn points_quote(&self, _quantity: u64) -> Result<PointsQuote, AllocationError> {
            Err(AllocationError::ZeroCeiling)
        }
    }

    struct Harness {
        runtime: AgentRuntime,
        repository: Arc<InMemoryConversationRepository>,
        audit: InMemoryAuditSink,
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            points_label: "Robux".to_owned(),
            cashapp_link: Some("https://cash.app/$tillbot".to_owned()),
            paypal_link: Some("https://paypal.me/tillbot".to_owned()),
            history_limit: HISTORY_LIMIT,
            llm_timeout: Duration::from_millis(100),
        }
    }

    fn harness_with(
        quotes: Arc<dyn QuoteRuntime>,
        assistant: Option<Arc<dyn LlmClient>>,
    ) -> Harness {
        let repository = Arc::new(InMemoryConversationRepository::default());
        let audit = InMemoryAuditSink::default();
        let runtime = AgentRuntime::new(
            repository.clone(),
            quotes,
            assistant,
            Arc::new(audit.clone()),
            settings(),
        );
        Harness { runtime, repository, audit }
    }

    fn harness(assistant: Option<Arc<dyn LlmClient>>) -> Harness {
        let quotes = DeterministicQuoteRuntime::new(
            FixedRatePricingEngine::default(),
            DenominationCatalog::default(),
            1_750_000,
        )
        .expect("quote runtime");
        harness_with(Arc::new(quotes), assistant)
    }

    fn message(sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: ConversationId(TICKET.to_owned()),
            sender: CustomerId(sender.to_owned()),
            text: text.to_owned(),
            correlation_id: format!("corr-{text}"),
        }
    }

    impl Harness {
        async fn say(&self, text: &str) -> Option<String> {
            self.runtime.handle_message(&message(CUSTOMER, text)).await.expect("handled")
        }

        async fn stage(&self) -> ConversationStage {
            self.record().await.stage()
        }

        async fn record(&self) -> tillbot_core::domain::conversation::ConversationRecord {
            let slot = self.repository.slot(&ConversationId(TICKET.to_owned())).await;
            let record = slot.lock().await.clone();
            record.expect("record exists")
        }
    }

    #[tokio::test]
    async fn first_message_opens_ticket_without_reading_it() {
        let harness = harness(None);

        let reply = harness.say("700k").await;

        assert_eq!(reply.as_deref(), Some(AMOUNT_PROMPT));
        let record = harness.record().await;
        assert_eq!(record.stage(), ConversationStage::AskAmount);
        assert!(record.quantity.is_none());
        assert_eq!(harness.repository.count().await, 1);
    }

    #[tokio::test]
    async fn amount_then_points_produces_pass_links() {
        let harness = harness(None);
        harness.say("hi").await;

        let prompt = harness.say("700k").await.expect("reply");
        assert_eq!(prompt, "Paying with **real money** or **Robux**?");
        assert_eq!(harness.stage().await, ConversationStage::AskPayment);
        assert_eq!(harness.record().await.quantity, Some(700_000));

        let quote = harness.say("robux").await.expect("reply");
        assert!(quote.starts_with("Total: **1050 Robux**"), "{quote}");
        assert!(quote.contains("• 1000 Robux – https://www.roblox.com/game-pass/"));
        assert!(quote.contains("• 50 Robux – "));
        assert!(!quote.contains("Adjusted"));

        let record = harness.record().await;
        assert_eq!(record.stage(), ConversationStage::Done);
        assert_eq!(record.payment_method, Some(PaymentMethod::Points));
        assert_eq!(record.last_points_total, Some(1050));
    }

    #[tokio::test]
    async fn max_money_in_cash_lists_payment_links() {
        let harness = harness(None);
        harness.say("hello").await;
        harness.say("max money").await;
        assert_eq!(harness.record().await.quantity, Some(1_750_000));

        let quote = harness.say("real money").await.expect("reply");

        assert_eq!(
            quote,
            "Total: **$26.25**\nCash App: https://cash.app/$tillbot\n\
             PayPal: https://paypal.me/tillbot"
        );
        assert_eq!(harness.record().await.payment_method, Some(PaymentMethod::Cash));
    }

    #[tokio::test]
    async fn adjusted_points_quote_overwrites_quantity() {
        let harness = harness(None);
        harness.say("hey").await;
        harness.say("100,300").await;

        let quote = harness.say("rbx").await.expect("reply");

        assert!(quote.starts_with("Total: **150 Robux**"), "{quote}");
        assert!(quote.contains("Adjusted to 100,000 game money"));
        assert_eq!(harness.record().await.quantity, Some(100_000));
    }

    #[tokio::test]
    async fn amounts_above_max_are_clamped() {
        let harness = harness(None);
        harness.say("hey").await;

        harness.say("5m").await;

        assert_eq!(harness.record().await.quantity, Some(1_750_000));
    }

    #[tokio::test]
    async fn unrecognised_input_reprompts_in_place() {
        let harness = harness(None);
        harness.say("hey").await;

        assert_eq!(harness.say("uh not sure").await.as_deref(), Some(AMOUNT_REPROMPT));
        assert_eq!(harness.stage().await, ConversationStage::AskAmount);

        harness.say("1m").await;
        assert_eq!(
            harness.say("whatever works").await.as_deref(),
            Some("Say **real money** or **Robux**.")
        );
        assert_eq!(harness.stage().await, ConversationStage::AskPayment);
    }

    #[tokio::test]
    async fn other_senders_are_ignored() {
        let harness = harness(None);
        harness.say("hey").await;

        let reply =
            harness.runtime.handle_message(&message("stranger", "700k")).await.expect("handled");

        assert!(reply.is_none());
        let record = harness.record().await;
        assert_eq!(record.stage(), ConversationStage::AskAmount);
        assert!(record.quantity.is_none());
    }

    #[tokio::test]
    async fn reset_returns_to_amount_from_any_stage() {
        let harness = harness(None);
        harness.say("hey").await;
        harness.say("700k").await;
        harness.say("cash").await;
        assert_eq!(harness.stage().await, ConversationStage::Done);

        let reply = harness.say("restart").await;

        assert_eq!(reply.as_deref(), Some(AMOUNT_PROMPT));
        let record = harness.record().await;
        assert_eq!(record.stage(), ConversationStage::AskAmount);
        assert!(record.quantity.is_none());
        assert!(record.last_quote.is_none());
        assert_eq!(record.customer_id, CustomerId(CUSTOMER.to_owned()));

        assert_eq!(harness.say("new order").await.as_deref(), Some(AMOUNT_PROMPT));
        assert_eq!(harness.stage().await, ConversationStage::AskAmount);
    }

    #[tokio::test]
    async fn done_stage_resends_quote_and_accepts_new_amounts() {
        let harness = harness(None);
        harness.say("hey").await;
        harness.say("700k").await;
        let quote = harness.say("paypal").await.expect("quote");

        assert_eq!(harness.say("where do i pay?").await, Some(quote));
        assert_eq!(harness.stage().await, ConversationStage::Done);

        let prompt = harness.say("actually 1m").await.expect("reply");
        assert_eq!(prompt, "Paying with **real money** or **Robux**?");
        let record = harness.record().await;
        assert_eq!(record.stage(), ConversationStage::AskPayment);
        assert_eq!(record.quantity, Some(1_000_000));
    }

    #[tokio::test]
    async fn free_text_without_assistant_is_answered_with_notice() {
        let harness = harness(None);
        harness.say("hey").await;
        harness.say("700k").await;
        harness.say("cash").await;

        assert_eq!(harness.say("thanks!").await.as_deref(), Some(ASSISTANT_UNAVAILABLE));
        assert_eq!(harness.record().await.history_len(), 0);
    }

    #[tokio::test]
    async fn extractor_resolves_amounts_the_parser_misses() {
        let llm = Arc::new(ScriptedLlm::with_replies(vec![Ok(r#"{"amount": 250000}"#.to_owned())]));
        let harness = harness(Some(llm.clone()));
        harness.say("hey").await;

        harness.say("a quarter million please").await;

        assert_eq!(harness.record().await.quantity, Some(250_000));
        assert_eq!(harness.stage().await, ConversationStage::AskPayment);
        assert_eq!(llm.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn extractor_failure_reprompts() {
        let llm = Arc::new(ScriptedLlm::with_replies(vec![Err(anyhow!("upstream 500"))]));
        let harness = harness(Some(llm));
        harness.say("hey").await;

        assert_eq!(harness.say("lots please").await.as_deref(), Some(AMOUNT_REPROMPT));
        assert_eq!(harness.stage().await, ConversationStage::AskAmount);
    }

    #[tokio::test]
    async fn assistant_replies_are_kept_in_bounded_history() {
        let script = (0..15).map(|index| Ok(format!("reply {index}"))).collect();
        let llm = Arc::new(ScriptedLlm::with_replies(script));
        let harness = harness(Some(llm.clone()));
        harness.say("hey").await;
        harness.say("700k").await;
        harness.say("cash").await;

        for index in 0..15 {
            let reply = harness.say("tell me more about the passes").await;
            assert_eq!(reply, Some(format!("reply {index}")));
        }

        let record = harness.record().await;
        assert_eq!(record.history_len(), HISTORY_LIMIT);
        assert_eq!(record.stage(), ConversationStage::Done);

        let requests = llm.requests().await;
        let (system, turns) = requests.last().expect("chat request");
        assert!(system.contains("700,000 game money for $10.50"));
        assert_eq!(turns.len(), HISTORY_LIMIT + 1);
    }

    #[tokio::test]
    async fn slow_assistant_times_out() {
        let harness = harness(Some(Arc::new(SlowLlm)));
        harness.say("hey").await;
        harness.say("700k").await;
        harness.say("cash").await;

        assert_eq!(harness.say("are you there").await.as_deref(), Some(ASSISTANT_UNAVAILABLE));
        assert_eq!(harness.record().await.history_len(), 0);
        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.name == "assistant.reply_failed"));
    }

    #[tokio::test]
    async fn failed_handling_leaves_record_untouched() {
        let harness = harness_with(Arc::new(BrokenPointsRuntime), None);
        harness.say("hey").await;
        harness.say("700k").await;

        let error = harness
            .runtime
            .handle_message(&message(CUSTOMER, "robux"))
            .await
            .expect_err("allocation failure");

        assert!(matches!(error, ApplicationError::Domain(_)));
        let record = harness.record().await;
        assert_eq!(record.stage(), ConversationStage::AskPayment);
        assert_eq!(record.quantity, Some(700_000));
        assert!(record.last_quote.is_none());
    }

    #[tokio::test]
    async fn transitions_and_quotes_are_audited() {
        let harness = harness(None);
        harness.say("hey").await;
        harness.say("700k").await;
        harness.say("robux").await;

        let events = harness.audit.events();

        assert_eq!(
            harness.audit.names(),
            vec![
                "conversation.created",
                "flow.transition_applied",
                "flow.transition_applied",
                "pricing.quote_emitted",
            ]
        );
        assert_eq!(events[3].details.get("total").map(String::as_str), Some("1050"));
        let ticket = ConversationId(TICKET.to_owned());
        assert!(events.iter().all(|event| event.conversation_id == ticket));
    }

    #[tokio::test]
    async fn small_talk_after_a_quote_skips_the_extractor() {
        let llm = Arc::new(ScriptedLlm::with_replies(vec![
            Ok("glad to help".to_owned()),
            Ok(r#"{"amount": 2000000}"#.to_owned()),
        ]));
        let harness = harness(Some(llm.clone()));
        harness.say("hey").await;
        harness.say("700k").await;
        harness.say("cash").await;

        assert_eq!(harness.say("thanks so much").await.as_deref(), Some("glad to help"));
        assert_eq!(llm.requests().await.len(), 1);
        assert_eq!(harness.stage().await, ConversationStage::Done);

        harness.say("make it a couple million").await;
        assert_eq!(llm.requests().await.len(), 2);
        assert_eq!(harness.record().await.quantity, Some(1_750_000));
        assert_eq!(harness.stage().await, ConversationStage::AskPayment);
    }

    #[tokio::test]
    async fn messages_in_one_ticket_are_handled_in_arrival_order() {
        let llm = Arc::new(DelayedLlm { delay: Duration::from_millis(40) });
        let harness = harness(Some(llm));
        harness.say("hey").await;
        harness.say("700k").await;
        harness.say("cash").await;

        let chatty = message(CUSTOMER, "tell me more about the passes");
        let new_amount = message(CUSTOMER, "1m");
        let (first, second) = tokio::join!(
            harness.runtime.handle_message(&chatty),
            harness.runtime.handle_message(&new_amount),
        );

        assert_eq!(
            first.expect("handled").as_deref(),
            Some("re: tell me more about the passes")
        );
        assert_eq!(
            second.expect("handled").as_deref(),
            Some("Paying with **real money** or **Robux**?")
        );
        let record = harness.record().await;
        assert_eq!(record.stage(), ConversationStage::AskPayment);
        assert_eq!(record.quantity, Some(1_000_000));
        assert_eq!(record.history_len(), 2);
    }
}
