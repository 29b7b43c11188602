pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, TicketFlow};
pub use states::{ConversationStage, FlowAction, FlowContext, FlowEvent, TransitionOutcome};
