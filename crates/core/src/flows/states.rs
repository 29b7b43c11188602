use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStage {
    AskAmount,
    AskPayment,
    Done,
}

impl ConversationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AskAmount => "ASK_AMOUNT",
            Self::AskPayment => "ASK_PAYMENT",
            Self::Done => "DONE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    ResetRequested,
    AmountResolved,
    AmountUnresolved,
    CashSelected,
    PointsSelected,
    PaymentUnrecognized,
    PaymentInfoRequested,
    FreeTextReceived,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub quantity_set: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    ClearRecord,
    StoreQuantity,
    AskForAmount,
    RepromptAmount,
    AskForPayment,
    RepromptPayment,
    QuoteCash,
    QuotePoints,
    ResendLastQuote,
    ForwardToAssistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationStage,
    pub to: ConversationStage,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
