use thiserror::Error;

use crate::{
    cpq::{allocation::AllocationError, catalog::CatalogError, pricing::PricingError},
    flows::{ConversationStage, FlowTransitionError},
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("transition expected stage {expected:?} but record is in {actual:?}")]
    StageMismatch { expected: ConversationStage, actual: ConversationStage },
    #[error("quantity {quantity} is outside 1..={max}")]
    QuantityOutOfRange { quantity: u64, max: u64 },
    #[error("points total {total} is not a positive multiple of {step}")]
    PointsOffStep { total: u64, step: u64 },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Text safe to post back into a conversation.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "Something went wrong handling that message. Please try again."
            }
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        match self {
            Self::Domain(error) => InterfaceError::BadRequest {
                message: error.to_string(),
                correlation_id: correlation_id.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cpq::allocation::AllocationError;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::QuantityOutOfRange {
            quantity: 0,
            max: 1_750_000,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "Something went wrong handling that message. Please try again."
        );
    }

    #[test]
    fn allocation_remainder_surfaces_as_domain_error() {
        let error =
            DomainError::from(AllocationError::Remainder { total_points: 75, remainder: 25 });

        assert_eq!(error.to_string(), "decomposing 75 points left a remainder of 25");
    }
}
