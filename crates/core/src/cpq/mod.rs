pub mod allocation;
pub mod amount;
pub mod catalog;
pub mod pricing;

use crate::domain::conversation::PaymentMethod;
use crate::domain::quote::{CashQuote, PointsQuote, Quote};

use self::{
    allocation::{AllocationError, AllocationPlanner},
    catalog::DenominationCatalog,
    pricing::PricingEngine,
};

/// Turns a stored quantity into a priced quote for either payment method.
pub trait QuoteRuntime: Send + Sync {
    fn max_quantity(&self) -> u64;
    fn cash_quote(&self, quantity: u64) -> CashQuote;
    fn points_quote(&self, quantity: u64) -> Result<PointsQuote, AllocationError>;

    fn quote(&self, quantity: u64, method: PaymentMethod) -> Result<Quote, AllocationError> {
        match method {
            PaymentMethod::Cash => Ok(Quote::Cash(self.cash_quote(quantity))),
            PaymentMethod::Points => self.points_quote(quantity).map(Quote::Points),
        }
    }
}

pub struct DeterministicQuoteRuntime<P> {
    pricing: P,
    planner: AllocationPlanner<P>,
}

impl<P> DeterministicQuoteRuntime<P>
where
    P: PricingEngine + Clone,
{
    pub fn new(
        pricing: P,
        catalog: DenominationCatalog,
        max_quantity: u64,
    ) -> Result<Self, AllocationError> {
        let planner = AllocationPlanner::new(pricing.clone(), catalog, max_quantity)?;
        Ok(Self { pricing, planner })
    }
}

impl<P> QuoteRuntime for DeterministicQuoteRuntime<P>
where
    P: PricingEngine + Clone,
{
    fn max_quantity(&self) -> u64 {
        self.planner.max_quantity()
    }

    fn cash_quote(&self, quantity: u64) -> CashQuote {
        CashQuote { quantity, total: self.pricing.cash_value(quantity) }
    }

    fn points_quote(&self, quantity: u64) -> Result<PointsQuote, AllocationError> {
        self.planner.plan(quantity).map(|plan| PointsQuote { plan })
    }
}
