use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::allocation::AllocationPlan;
use crate::cpq::pricing::format_cash;
use crate::domain::conversation::PaymentMethod;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashQuote {
    pub quantity: u64,
    /// Full precision; round only for display.
    pub total: Decimal,
}

impl CashQuote {
    pub fn display_total(&self) -> String {
        format_cash(self.total)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsQuote {
    pub plan: AllocationPlan,
}

impl PointsQuote {
    pub fn total_points(&self) -> u64 {
        self.plan.total_points
    }

    pub fn quantity(&self) -> u64 {
        self.plan.adjusted_quantity
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Quote {
    Cash(CashQuote),
    Points(PointsQuote),
}

impl Quote {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::Cash(_) => PaymentMethod::Cash,
            Self::Points(_) => PaymentMethod::Points,
        }
    }

    /// Quantity the quote is actually for, after any points adjustment.
    pub fn quantity(&self) -> u64 {
        match self {
            Self::Cash(quote) => quote.quantity,
            Self::Points(quote) => quote.quantity(),
        }
    }
}
