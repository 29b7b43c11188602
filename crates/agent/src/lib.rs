//! Agent runtime: drives each ticket conversation from amount to quote.
//!
//! Incoming text is classified into a flow event, the pure transition table
//! in `tillbot-core::flows` decides the outcome, and this crate carries out
//! the resulting actions:
//! 1. **Interpretation** (`conversation`) - local amount parsing first, then
//!    the model-backed extractor, plus keyword detectors for payment method,
//!    reset and "how do I pay".
//! 2. **Quoting** - prices and allocations come from the deterministic quote
//!    runtime in core.
//! 3. **Assistant** (`llm`) - free text after checkout goes to an
//!    OpenAI-compatible chat endpoint with a bounded history window.
//!
//! The model only ever proposes an amount or writes small talk. It never
//! sets prices or picks denominations.

pub mod conversation;
pub mod llm;
pub mod runtime;

pub use runtime::{AgentRuntime, AgentSettings, InboundMessage};
