use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use tillbot_core::domain::conversation::ConversationId;

use super::{ConversationRepository, ConversationSlot};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    slots: RwLock<HashMap<ConversationId, ConversationSlot>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn slot(&self, id: &ConversationId) -> ConversationSlot {
        if let Some(slot) = self.slots.read().await.get(id) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(id.clone()).or_insert_with(|| Arc::new(Mutex::new(None))))
    }

    async fn count(&self) -> usize {
        let slots = self.slots.read().await;
        // A slot locked by an in-flight handler is counted as tracked.
        slots
            .values()
            .filter(|slot| slot.try_lock().map(|record| record.is_some()).unwrap_or(true))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tillbot_core::domain::conversation::{ConversationId, ConversationRecord, CustomerId};

    use crate::repositories::{ConversationRepository, InMemoryConversationRepository};

    fn record(channel: &str) -> ConversationRecord {
        ConversationRecord::new(
            ConversationId(channel.to_string()),
            CustomerId("customer-1".to_string()),
        )
    }

    #[tokio::test]
    async fn record_written_through_a_slot_is_visible_to_later_lookups() {
        let repo = InMemoryConversationRepository::default();
        let record = record("channel-1");

        *repo.slot(&record.id).await.lock().await = Some(record.clone());
        let found = repo.slot(&record.id).await.lock().await.clone();

        assert_eq!(found, Some(record));
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn empty_slot_is_not_counted() {
        let repo = InMemoryConversationRepository::default();
        let id = ConversationId("channel-2".to_string());

        let slot = repo.slot(&id).await;

        assert!(slot.lock().await.is_none());
        assert_eq!(repo.count().await, 0);
    }

    #[tokio::test]
    async fn same_id_shares_one_slot() {
        let repo = InMemoryConversationRepository::default();
        let id = ConversationId("channel-3".to_string());

        let first = repo.slot(&id).await;
        let second = repo.slot(&id).await;

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn slot_lock_serializes_updates_for_one_conversation() {
        let repo = Arc::new(InMemoryConversationRepository::default());
        let id = ConversationId("channel-4".to_string());
        *repo.slot(&id).await.lock().await = Some(record("channel-4"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let slot = repo.slot(&id).await;
                let mut guard = slot.lock().await;
                let mut working = guard.clone().expect("seeded record");
                let next = working.quantity.unwrap_or(0) + 1;
                tokio::time::sleep(Duration::from_millis(2)).await;
                working.set_quantity(next, 1_750_000).expect("quantity");
                *guard = Some(working);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        let stored = repo.slot(&id).await.lock().await.clone().expect("record");
        assert_eq!(stored.quantity, Some(8));
    }
}
