use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cpq::allocation::POINTS_STEP;
use crate::domain::quote::Quote;
use crate::errors::DomainError;
use crate::flows::{ConversationStage, TransitionOutcome};

/// Most recent history entries kept for assistant context.
pub const HISTORY_LIMIT: usize = 20;
/// Longest single history entry, in characters.
pub const HISTORY_ENTRY_CHARS: usize = 2_000;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Points,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Per-conversation order state. The stage only moves through
/// [`ConversationRecord::advance`] and [`ConversationRecord::reset`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub customer_id: CustomerId,
    stage: ConversationStage,
    pub quantity: Option<u64>,
    pub payment_method: Option<PaymentMethod>,
    pub last_points_total: Option<u64>,
    pub last_quote: Option<Quote>,
    history: VecDeque<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(id: ConversationId, customer_id: CustomerId) -> Self {
        let now = Utc::now();
        Self {
            id,
            customer_id,
            stage: ConversationStage::AskAmount,
            quantity: None,
            payment_method: None,
            last_points_total: None,
            last_quote: None,
            history: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self) -> ConversationStage {
        self.stage
    }

    pub fn is_customer(&self, sender: &CustomerId) -> bool {
        &self.customer_id == sender
    }

    pub fn advance(&mut self, outcome: &TransitionOutcome) -> Result<(), DomainError> {
        if outcome.from != self.stage {
            return Err(DomainError::StageMismatch { expected: outcome.from, actual: self.stage });
        }
        self.stage = outcome.to;
        self.touch();
        Ok(())
    }

    /// Back to a fresh order for the same customer.
    pub fn reset(&mut self) {
        self.stage = ConversationStage::AskAmount;
        self.quantity = None;
        self.payment_method = None;
        self.last_points_total = None;
        self.last_quote = None;
        self.history.clear();
        self.touch();
    }

    pub fn set_quantity(&mut self, quantity: u64, max_quantity: u64) -> Result<(), DomainError> {
        if quantity == 0 || quantity > max_quantity {
            return Err(DomainError::QuantityOutOfRange { quantity, max: max_quantity });
        }
        self.quantity = Some(quantity);
        self.touch();
        Ok(())
    }

    /// Stores an emitted quote. Points quotes overwrite the quantity with the
    /// adjusted one.
    pub fn record_quote(&mut self, quote: Quote) -> Result<(), DomainError> {
        match &quote {
            Quote::Cash(_) => self.last_points_total = None,
            Quote::Points(points) => {
                let total = points.total_points();
                if total == 0 || total % POINTS_STEP != 0 {
                    return Err(DomainError::PointsOffStep { total, step: POINTS_STEP });
                }
                self.last_points_total = Some(total);
            }
        }
        self.quantity = Some(quote.quantity());
        self.payment_method = Some(quote.method());
        self.last_quote = Some(quote);
        self.touch();
        Ok(())
    }

    pub fn push_history(&mut self, role: Role, text: &str) {
        let text = text.chars().take(HISTORY_ENTRY_CHARS).collect();
        self.history.push_back(HistoryEntry { role, text });
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.touch();
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
