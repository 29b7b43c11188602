use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tillbot_core::domain::conversation::{ConversationId, ConversationRecord};

pub mod memory;

pub use memory::InMemoryConversationRepository;

/// Exclusive access point for one conversation. `None` until the first
/// qualifying message creates the record.
pub type ConversationSlot = Arc<Mutex<Option<ConversationRecord>>>;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Returns the slot for `id`, creating an empty one on first use.
    async fn slot(&self, id: &ConversationId) -> ConversationSlot;

    /// Conversations that hold a record.
    async fn count(&self) -> usize;
}
