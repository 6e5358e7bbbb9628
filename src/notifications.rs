//! Live notification bridge
//!
//! The socket that delivers server push notifications is owned elsewhere;
//! it hands decoded [`RemoteEvent`]s to an mpsc channel. The listener
//! spawned here drains that channel into the [`InvalidationCoordinator`] so
//! cached views follow changes made by other users.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::invalidation::{InvalidationCoordinator, RemoteEvent};
use crate::cache::keys::{KeyPattern, ResourceKind};
use crate::error::{Result, WorkdeskError};

/// Decodes one notification frame.
///
/// # Errors
///
/// Returns [`WorkdeskError::Serialization`] when the frame is not a valid
/// event.
pub fn parse_event(frame: &str) -> Result<RemoteEvent> {
    serde_json::from_str(frame).map_err(|e| WorkdeskError::Serialization(e).into())
}

/// Spawns a task applying every event received on `receiver`.
///
/// Each event goes through the regular invalidation policy, and the
/// notification lists themselves are marked stale so the inbox refetches.
/// The task ends when every sender is dropped and returns the number of
/// events it applied.
pub fn spawn_listener(
    mut receiver: mpsc::Receiver<RemoteEvent>,
    coordinator: InvalidationCoordinator,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut applied = 0;
        while let Some(event) = receiver.recv().await {
            tracing::debug!(kind = %event.kind, action = ?event.action, "Remote change");
            coordinator.apply_remote_event(&event);
            coordinator
                .cache()
                .mark_stale(&KeyPattern::Collections(ResourceKind::NOTIFICATIONS));
            applied += 1;
        }
        tracing::debug!("Notification channel closed after {} events", applied);
        applied
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::QueryKeys;
    use crate::cache::store::ResponseCache;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_listener_applies_events_until_closed() {
        let cache: Arc<ResponseCache<Value>> = Arc::new(ResponseCache::new(None));
        let tasks = QueryKeys::new(ResourceKind::TASKS);
        let inbox = QueryKeys::new(ResourceKind::NOTIFICATIONS);
        let leaves = QueryKeys::new(ResourceKind::LEAVES);
        cache.insert(tasks.all(), json!([]));
        cache.insert(inbox.all(), json!([]));
        cache.insert(leaves.all(), json!([]));

        let (sender, receiver) = mpsc::channel(8);
        let handle = spawn_listener(receiver, InvalidationCoordinator::new(Arc::clone(&cache)));

        sender
            .send(parse_event(r#"{"kind":"tasks","id":3,"action":"created"}"#).unwrap())
            .await
            .unwrap();
        drop(sender);

        assert_eq!(handle.await.unwrap(), 1);
        assert!(cache.get(&tasks.all()).unwrap().stale);
        assert!(cache.get(&inbox.all()).unwrap().stale);
        assert!(!cache.get(&leaves.all()).unwrap().stale);
    }

    #[test]
    fn test_parse_event_rejects_garbage() {
        assert!(parse_event("not json").is_err());
        assert!(parse_event(r#"{"kind":"tasks","action":"exploded"}"#).is_err());
    }
}
