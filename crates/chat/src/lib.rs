//! Chat transport interface for tillbot
//!
//! - **Events** (`events`) - inbound channel messages, category scoping, dispatch
//! - **Socket** (`socket`) - transport trait, reconnecting event loop, no-op transport
//! - **Gateway** (`gateway`) - realtime inbound events plus HTTP delivery and channel lookup
//!
//! # Architecture
//!
//! ```text
//! Gateway → ChatRunner → EventDispatcher → ChannelMessageHandler → Agent Runtime
//!               ↑                                                     │
//!               └─────────────────── reply text ──────────────────────┘
//! ```
//!
//! Only channels whose parent category matches the configured ticket
//! category are answered; bot-authored messages are always ignored.

pub mod events;
pub mod gateway;
pub mod socket;
