use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use tillbot_core::cpq::amount::{parse_amount, ParsedAmount};
use tillbot_core::domain::conversation::PaymentMethod;

use crate::llm::{ChatTurn, LlmClient};

const RESET_WORDS: &[&str] = &["restart", "reset", "new", "new order"];
const POINTS_WORDS: &[&str] = &["robux", "rbx", "points", "gamepass", "gamepasses"];
const CASH_WORDS: &[&str] =
    &["real", "cash", "usd", "dollar", "dollars", "paypal", "cashapp", "cash app"];
const PAY_INTENT_PHRASES: &[&str] = &[
    "where do i pay",
    "how do i pay",
    "where to pay",
    "how to pay",
    "where can i pay",
    "payment link",
    "pay link",
    "the link",
    "the links",
    "how can i pay",
];

const EXTRACTION_PROMPT: &str = "You read customer messages in a shop that sells in-game money. \
Reply with a single JSON object and nothing else: {\"amount\": <integer or null>}. \
The amount is the quantity of in-game money the customer wants to buy. \
Expand shorthand such as 700k (700000), 1.5m (1500000) or \"two mil\" (2000000). \
Use the string \"max\" if they ask for the maximum. Use null if no amount is stated.";

/// Whole-message match on the trimmed, lower-cased text.
pub fn is_reset(text: &str) -> bool {
    let normalized = normalize_text(text);
    RESET_WORDS.contains(&normalized.as_str())
}

/// Points keywords win when a message names both.
pub fn detect_payment_method(text: &str) -> Option<PaymentMethod> {
    let tokens = tokenize(text);
    if POINTS_WORDS.iter().any(|word| contains_phrase(&tokens, word)) {
        return Some(PaymentMethod::Points);
    }
    if CASH_WORDS.iter().any(|word| contains_phrase(&tokens, word)) {
        return Some(PaymentMethod::Cash);
    }
    None
}

pub fn is_pay_intent(text: &str) -> bool {
    let tokens = tokenize(text);
    PAY_INTENT_PHRASES.iter().any(|phrase| contains_phrase(&tokens, phrase))
}

fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() || words.len() > tokens.len() {
        return false;
    }
    tokens.windows(words.len()).any(|window| {
        window.iter().zip(&words).all(|(token, word)| token.as_str() == *word)
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpreterKind {
    /// Runs in-process and never fails.
    Local,
    /// Calls out to a model and may time out.
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpretationScope {
    All,
    LocalOnly,
    RemoteOnly,
}

impl InterpretationScope {
    fn admits(self, kind: InterpreterKind) -> bool {
        match self {
            Self::All => true,
            Self::LocalOnly => kind == InterpreterKind::Local,
            Self::RemoteOnly => kind == InterpreterKind::Remote,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedAmount {
    pub amount: ParsedAmount,
    pub source: &'static str,
}

#[async_trait]
pub trait AmountInterpreter: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> InterpreterKind;
    async fn interpret(&self, text: &str) -> Option<ParsedAmount>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LocalAmountParser;

#[async_trait]
impl AmountInterpreter for LocalAmountParser {
    fn name(&self) -> &'static str {
        "local_parser"
    }

    fn kind(&self) -> InterpreterKind {
        InterpreterKind::Local
    }

    async fn interpret(&self, text: &str) -> Option<ParsedAmount> {
        parse_amount(text)
    }
}

/// Asks the model for `{"amount": ...}`. Any failure counts as no amount.
pub struct LlmAmountExtractor {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmAmountExtractor {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl AmountInterpreter for LlmAmountExtractor {
    fn name(&self) -> &'static str {
        "llm_extractor"
    }

    fn kind(&self) -> InterpreterKind {
        InterpreterKind::Remote
    }

    async fn interpret(&self, text: &str) -> Option<ParsedAmount> {
        let turns = [ChatTurn::user(text)];
        let reply =
            match tokio::time::timeout(self.timeout, self.client.chat(EXTRACTION_PROMPT, &turns))
                .await
            {
                Ok(Ok(reply)) => reply,
                Ok(Err(error)) => {
                    warn!(
                        event_name = "assistant.extraction.failed",
                        error = %error,
                        "amount extraction request failed"
                    );
                    return None;
                }
                Err(_) => {
                    warn!(
                        event_name = "assistant.extraction.timed_out",
                        timeout_ms = self.timeout.as_millis() as u64,
                        "amount extraction timed out"
                    );
                    return None;
                }
            };

        let parsed = parse_extraction(&reply);
        debug!(
            event_name = "assistant.extraction.parsed",
            resolved = parsed.is_some(),
            "amount extraction parsed"
        );
        parsed
    }
}

#[derive(Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    amount: Value,
}

/// Reads the first JSON object in `reply`. Only positive amounts resolve.
pub fn parse_extraction(reply: &str) -> Option<ParsedAmount> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let payload: ExtractionPayload = serde_json::from_str(&reply[start..=end]).ok()?;

    match payload.amount {
        Value::Number(number) => {
            if let Some(quantity) = number.as_u64() {
                return (quantity > 0).then_some(ParsedAmount::Quantity(quantity));
            }
            let value = number.as_f64()?;
            if !value.is_finite() || value < 0.5 || value > u64::MAX as f64 {
                return None;
            }
            Some(ParsedAmount::Quantity(value.round() as u64))
        }
        Value::String(text) => parse_amount(&text),
        _ => None,
    }
}

/// Ordered interpretation strategies; the first one that resolves wins.
#[derive(Default)]
pub struct InterpretationChain {
    interpreters: Vec<Box<dyn AmountInterpreter>>,
}

impl InterpretationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local parser, then the model extractor when a client is available.
    pub fn standard(client: Option<Arc<dyn LlmClient>>, timeout: Duration) -> Self {
        let mut chain = Self::new().with(LocalAmountParser);
        if let Some(client) = client {
            chain = chain.with(LlmAmountExtractor::new(client, timeout));
        }
        chain
    }

    pub fn with<I>(mut self, interpreter: I) -> Self
    where
        I: AmountInterpreter + 'static,
    {
        self.interpreters.push(Box::new(interpreter));
        self
    }

    pub async fn resolve(&self, text: &str, scope: InterpretationScope) -> Option<ResolvedAmount> {
        for interpreter in &self.interpreters {
            if !scope.admits(interpreter.kind()) {
                continue;
            }
            if let Some(amount) = interpreter.interpret(text).await {
                return Some(ResolvedAmount { amount, source: interpreter.name() });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tillbot_core::cpq::amount::ParsedAmount;
    use tillbot_core::domain::conversation::PaymentMethod;
    use tokio::sync::Mutex;

    use super::{
        detect_payment_method, is_pay_intent, is_reset, parse_extraction, InterpretationChain,
        InterpretationScope,
    };
    use crate::llm::{ChatTurn, LlmClient};

    struct CannedClient {
        replies: Mutex<Vec<Result<String>>>,
        calls: Mutex<usize>,
    }

    impl CannedClient {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self { replies: Mutex::new(replies), calls: Mutex::new(0) }
        }
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn chat(&self, _system: &str, _turns: &[ChatTurn]) -> Result<String> {
            *self.calls.lock().await += 1;
            let mut replies = self.replies.lock().await;
            if replies.is_empty() {
                return Err(anyhow!("no scripted reply"));
            }
            replies.remove(0)
        }
    }

    #[test]
    fn reset_matches_whole_message_only() {
        assert!(is_reset("restart"));
        assert!(is_reset("  New Order "));
        assert!(is_reset("RESET"));
        assert!(!is_reset("restart please"));
        assert!(!is_reset("a new order of 700k"));
    }

    #[test]
    fn payment_keywords_prefer_points() {
        struct Case {
            text: &'static str,
            expected: Option<PaymentMethod>,
        }

        let cases = [
            Case { text: "robux", expected: Some(PaymentMethod::Points) },
            Case { text: "Real money please", expected: Some(PaymentMethod::Cash) },
            Case { text: "i'll use cash app", expected: Some(PaymentMethod::Cash) },
            Case { text: "paypal", expected: Some(PaymentMethod::Cash) },
            Case { text: "gamepasses!", expected: Some(PaymentMethod::Points) },
            Case { text: "cash or robux, robux i guess", expected: Some(PaymentMethod::Points) },
            Case { text: "really not sure", expected: None },
            Case { text: "hmm", expected: None },
        ];

        for case in cases {
            assert_eq!(detect_payment_method(case.text), case.expected, "text: {}", case.text);
        }
    }

    #[test]
    fn pay_intent_phrases_are_detected() {
        assert!(is_pay_intent("ok where do I pay?"));
        assert!(is_pay_intent("can you send the links again"));
        assert!(is_pay_intent("Payment link pls"));
        assert!(!is_pay_intent("thanks a lot"));
        assert!(!is_pay_intent("pay later"));
    }

    #[test]
    fn extraction_replies_are_read_leniently() {
        assert_eq!(
            parse_extraction(r#"{"amount": 250000}"#),
            Some(ParsedAmount::Quantity(250_000))
        );
        assert_eq!(
            parse_extraction("Sure! {\"amount\": 1500000.0} hope that helps"),
            Some(ParsedAmount::Quantity(1_500_000))
        );
        assert_eq!(parse_extraction(r#"{"amount": "max"}"#), Some(ParsedAmount::Max));
        assert_eq!(parse_extraction(r#"{"amount": null}"#), None);
        assert_eq!(parse_extraction(r#"{"amount": 0}"#), None);
        assert_eq!(parse_extraction(r#"{"amount": -5}"#), None);
        assert_eq!(parse_extraction("no json here"), None);
    }

    #[tokio::test]
    async fn chain_prefers_local_parse_and_skips_model() {
        let client = Arc::new(CannedClient::new(vec![Ok(r#"{"amount": 5}"#.to_owned())]));
        let chain = InterpretationChain::standard(Some(client.clone()), Duration::from_secs(1));

        let resolved = chain.resolve("700k", InterpretationScope::All).await.expect("resolved");

        assert_eq!(resolved.amount, ParsedAmount::Quantity(700_000));
        assert_eq!(resolved.source, "local_parser");
        assert_eq!(*client.calls.lock().await, 0);
    }

    #[tokio::test]
    async fn chain_falls_back_to_model() {
        let client =
            Arc::new(CannedClient::new(vec![Ok(r#"{"amount": 300000}"#.to_owned())]));
        let chain = InterpretationChain::standard(Some(client), Duration::from_secs(1));

        let resolved = chain
            .resolve("three hundred thousand please", InterpretationScope::All)
            .await
            .expect("resolved");

        assert_eq!(resolved.amount, ParsedAmount::Quantity(300_000));
        assert_eq!(resolved.source, "llm_extractor");
    }

    #[tokio::test]
    async fn scope_limits_which_interpreters_run() {
        let client =
            Arc::new(CannedClient::new(vec![Ok(r#"{"amount": 300000}"#.to_owned())]));
        let chain = InterpretationChain::standard(Some(client.clone()), Duration::from_secs(1));

        assert!(chain.resolve("three hundred k", InterpretationScope::LocalOnly).await.is_none());
        assert_eq!(*client.calls.lock().await, 0);
        assert!(chain.resolve("700k", InterpretationScope::RemoteOnly).await.is_some());
        assert_eq!(*client.calls.lock().await, 1);
    }

    #[tokio::test]
    async fn model_failure_is_unresolved() {
        let client = Arc::new(CannedClient::new(vec![Err(anyhow!("503"))]));
        let chain = InterpretationChain::standard(Some(client.clone()), Duration::from_secs(1));

        assert!(chain.resolve("some robux", InterpretationScope::All).await.is_none());
        assert_eq!(*client.calls.lock().await, 1);
    }
}
