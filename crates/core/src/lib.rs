pub mod audit;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;
pub mod flows;

pub use cpq::allocation::{AllocationError, AllocationPlan, AllocationPlanner, LineItem};
pub use cpq::amount::{parse_amount, ParsedAmount};
pub use cpq::catalog::{Denomination, DenominationCatalog};
pub use cpq::pricing::{FixedRatePricingEngine, PricingEngine, PricingRates};
pub use cpq::{DeterministicQuoteRuntime, QuoteRuntime};
pub use domain::conversation::{
    ConversationId, ConversationRecord, CustomerId, HistoryEntry, PaymentMethod, Role,
};
pub use domain::quote::{CashQuote, PointsQuote, Quote};
pub use errors::{ApplicationError, DomainError, InterfaceError};
