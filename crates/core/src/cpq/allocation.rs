use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpq::catalog::DenominationCatalog;
use crate::cpq::pricing::{round_whole, whole_to_u64, PricingEngine};

/// Points totals are always a whole number of this step.
pub const POINTS_STEP: u64 = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub unit_size: u64,
    pub redemption_link: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSummary {
    pub unit_size: u64,
    pub count: u64,
    pub redemption_link: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub desired_quantity: u64,
    pub adjusted_quantity: u64,
    pub exact_points: Decimal,
    pub total_points: u64,
    pub line_items: Vec<LineItem>,
}

impl AllocationPlan {
    pub fn adjusted(&self) -> bool {
        self.adjusted_quantity != self.desired_quantity
    }

    /// Line items grouped by unit size, largest first.
    pub fn summary(&self) -> Vec<LineSummary> {
        let mut grouped: Vec<LineSummary> = Vec::new();
        for item in &self.line_items {
            match grouped.last_mut() {
                Some(last) if last.unit_size == item.unit_size => last.count += 1,
                _ => grouped.push(LineSummary {
                    unit_size: item.unit_size,
                    count: 1,
                    redemption_link: item.redemption_link.clone(),
                }),
            }
        }
        grouped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("catalog minimum unit {catalog_minimum} does not match the points step {step}")]
    StepMismatch { catalog_minimum: u64, step: u64 },
    #[error("decomposing {total_points} points left a remainder of {remainder}")]
    Remainder { total_points: u64, remainder: u64 },
    #[error("maximum quantity must be greater than zero")]
    ZeroCeiling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    points: u64,
    quantity: u64,
}

/// Maps a desired quantity onto the nearest points total the catalog can
/// deliver, then splits that total into catalog units.
#[derive(Clone, Debug)]
pub struct AllocationPlanner<P> {
    pricing: P,
    catalog: DenominationCatalog,
    max_quantity: u64,
}

impl<P> AllocationPlanner<P>
where
    P: PricingEngine,
{
    pub fn new(
        pricing: P,
        catalog: DenominationCatalog,
        max_quantity: u64,
    ) -> Result<Self, AllocationError> {
        if max_quantity == 0 {
            return Err(AllocationError::ZeroCeiling);
        }
        let catalog_minimum = catalog.minimum_unit();
        if catalog_minimum != POINTS_STEP {
            return Err(AllocationError::StepMismatch { catalog_minimum, step: POINTS_STEP });
        }
        Ok(Self { pricing, catalog, max_quantity })
    }

    pub fn max_quantity(&self) -> u64 {
        self.max_quantity
    }

    pub fn plan(&self, desired_quantity: u64) -> Result<AllocationPlan, AllocationError> {
        let exact_points = self.pricing.exact_points(desired_quantity);
        let step = Decimal::from(POINTS_STEP);
        let base = exact_points / step;

        let mut candidates: Vec<Candidate> = Vec::with_capacity(2);
        for raw in [base.floor() * step, base.ceil() * step] {
            if raw <= Decimal::ZERO {
                continue;
            }
            if let Some(candidate) = self.renormalize(raw) {
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }

        let chosen = candidates
            .into_iter()
            .min_by(|left, right| {
                let left_distance = left.quantity.abs_diff(desired_quantity);
                let right_distance = right.quantity.abs_diff(desired_quantity);
                left_distance.cmp(&right_distance).then_with(|| right.points.cmp(&left.points))
            })
            .unwrap_or_else(|| Candidate {
                points: POINTS_STEP,
                quantity: self.implied_quantity(step),
            });

        let line_items = self.decompose(chosen.points)?;

        Ok(AllocationPlan {
            desired_quantity,
            adjusted_quantity: chosen.quantity,
            exact_points,
            total_points: chosen.points,
            line_items,
        })
    }

    /// Greedy split over the catalog, largest unit first.
    pub fn decompose(&self, total_points: u64) -> Result<Vec<LineItem>, AllocationError> {
        let mut remaining = total_points;
        let mut line_items = Vec::new();

        for denomination in self.catalog.descending() {
            let count = remaining / denomination.unit_size;
            for _ in 0..count {
                line_items.push(LineItem {
                    unit_size: denomination.unit_size,
                    redemption_link: denomination.redemption_link.clone(),
                });
            }
            remaining -= count * denomination.unit_size;
        }

        if remaining != 0 {
            return Err(AllocationError::Remainder { total_points, remainder: remaining });
        }
        Ok(line_items)
    }

    // Clamping the implied quantity can move it off the step grid, so the
    // points value is snapped back to the grid and the quantity clamped again.
    fn renormalize(&self, raw_points: Decimal) -> Option<Candidate> {
        let step = Decimal::from(POINTS_STEP);
        let first_quantity = self.implied_quantity(raw_points);

        let snapped = round_whole(self.pricing.exact_points(first_quantity) / step) * step;
        if snapped <= Decimal::ZERO {
            return None;
        }

        let points = whole_to_u64(snapped)?;
        Some(Candidate { points, quantity: self.implied_quantity(snapped) })
    }

    fn implied_quantity(&self, points: Decimal) -> u64 {
        let quantity = whole_to_u64(self.pricing.quantity_from_points(points)).unwrap_or(0);
        quantity.clamp(1, self.max_quantity)
    }
}
