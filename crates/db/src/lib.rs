//! Conversation storage.
//!
//! Records live in process memory only and are lost on restart. Each
//! conversation gets its own lock slot so handlers for one conversation run
//! one at a time while different conversations proceed in parallel.

pub mod repositories;

pub use repositories::{ConversationRepository, ConversationSlot, InMemoryConversationRepository};
