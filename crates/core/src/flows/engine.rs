use thiserror::Error;

use crate::audit::{AuditOutcome, AuditScope, AuditSink};
use crate::flows::states::{
    ConversationStage, FlowAction, FlowContext, FlowEvent, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_stage(&self) -> ConversationStage;
    fn transition(
        &self,
        current: ConversationStage,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Amount, then payment method, then an open-ended done stage.
#[derive(Clone, Debug, Default)]
pub struct TicketFlow;

impl FlowDefinition for TicketFlow {
    fn initial_stage(&self) -> ConversationStage {
        ConversationStage::AskAmount
    }

    fn transition(
        &self,
        current: ConversationStage,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_ticket(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_stage(&self) -> ConversationStage {
        self.flow.initial_stage()
    }

    pub fn apply(
        &self,
        current: ConversationStage,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: ConversationStage,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditScope,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("flow.transition_applied", AuditOutcome::Success)
                        .detail("from", outcome.from.as_str())
                        .detail("to", outcome.to.as_str())
                        .detail("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("flow.transition_rejected", AuditOutcome::Rejected)
                        .detail("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<TicketFlow> {
    fn default() -> Self {
        Self::new(TicketFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("no quantity stored before {event:?} in {stage:?}")]
    MissingQuantity { stage: ConversationStage, event: FlowEvent },
    #[error("invalid transition from {stage:?} using event {event:?}")]
    InvalidTransition { stage: ConversationStage, event: FlowEvent },
}

fn transition_ticket(
    current: ConversationStage,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationStage::{AskAmount, AskPayment, Done};
    use FlowAction::{
        AskForAmount, AskForPayment, ClearRecord, ForwardToAssistant, QuoteCash, QuotePoints,
        RepromptAmount, RepromptPayment, ResendLastQuote, StoreQuantity,
    };
    use FlowEvent::{
        AmountResolved, AmountUnresolved, CashSelected, FreeTextReceived, PaymentInfoRequested,
        PaymentUnrecognized, PointsSelected, ResetRequested,
    };

    let (to, actions) = match (current, event) {
        (_, ResetRequested) => (AskAmount, vec![ClearRecord, AskForAmount]),
        (AskAmount, AmountResolved) | (Done, AmountResolved) => {
            (AskPayment, vec![StoreQuantity, AskForPayment])
        }
        (AskAmount, AmountUnresolved) => (AskAmount, vec![RepromptAmount]),
        (AskPayment, CashSelected) | (AskPayment, PointsSelected) => {
            if !context.quantity_set {
                return Err(FlowTransitionError::MissingQuantity {
                    stage: current,
                    event: event.clone(),
                });
            }
            let action = if *event == CashSelected { QuoteCash } else { QuotePoints };
            (Done, vec![action])
        }
        (AskPayment, PaymentUnrecognized) => (AskPayment, vec![RepromptPayment]),
        (Done, PaymentInfoRequested) => (Done, vec![ResendLastQuote]),
        (Done, FreeTextReceived) => (Done, vec![ForwardToAssistant]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                stage: current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current, to, event: event.clone(), actions })
}
