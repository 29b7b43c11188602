use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base-currency quantity that both rates are quoted against.
pub const RATE_BASIS: u64 = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRates {
    /// Cash units charged per `RATE_BASIS` of base currency.
    pub cash_per_basis: Decimal,
    /// Points charged per `RATE_BASIS` of base currency.
    pub points_per_basis: Decimal,
}

impl Default for PricingRates {
    fn default() -> Self {
        Self { cash_per_basis: Decimal::new(150, 2), points_per_basis: Decimal::from(150) }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("{rate} must be greater than zero, got {value}")]
    NonPositiveRate { rate: &'static str, value: Decimal },
}

pub trait PricingEngine: Send + Sync {
    fn cash_value(&self, quantity: u64) -> Decimal;
    fn exact_points(&self, quantity: u64) -> Decimal;
    fn quantity_from_points(&self, points: Decimal) -> Decimal;
}

/// Linear conversions at fixed rates. Nothing here rounds; callers decide
/// where precision is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedRatePricingEngine {
    rates: PricingRates,
}

impl Default for FixedRatePricingEngine {
    fn default() -> Self {
        Self { rates: PricingRates::default() }
    }
}

impl FixedRatePricingEngine {
    pub fn new(rates: PricingRates) -> Result<Self, PricingError> {
        if rates.cash_per_basis <= Decimal::ZERO {
            return Err(PricingError::NonPositiveRate {
                rate: "cash_per_basis",
                value: rates.cash_per_basis,
            });
        }
        if rates.points_per_basis <= Decimal::ZERO {
            return Err(PricingError::NonPositiveRate {
                rate: "points_per_basis",
                value: rates.points_per_basis,
            });
        }
        Ok(Self { rates })
    }

    pub fn rates(&self) -> PricingRates {
        self.rates
    }
}

impl PricingEngine for FixedRatePricingEngine {
    fn cash_value(&self, quantity: u64) -> Decimal {
        basis_units(quantity) * self.rates.cash_per_basis
    }

    fn exact_points(&self, quantity: u64) -> Decimal {
        basis_units(quantity) * self.rates.points_per_basis
    }

    fn quantity_from_points(&self, points: Decimal) -> Decimal {
        points / self.rates.points_per_basis * Decimal::from(RATE_BASIS)
    }
}

fn basis_units(quantity: u64) -> Decimal {
    Decimal::from(quantity) / Decimal::from(RATE_BASIS)
}

/// Rounds to the nearest whole number, halves away from zero.
pub fn round_whole(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Whole, non-negative value as `u64`; `None` for negatives or overflow.
pub fn whole_to_u64(value: Decimal) -> Option<u64> {
    if value.is_sign_negative() {
        return None;
    }
    round_whole(value).to_u64()
}

/// Presentation form of a cash amount: two decimal places, halves away from zero.
pub fn format_cash(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Groups thousands with commas (`1750000` -> `1,750,000`).
pub fn format_quantity(quantity: u64) -> String {
    let digits = quantity.to_string();
    let mut output = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            output.push(',');
        }
        output.push(digit);
    }
    output
}
