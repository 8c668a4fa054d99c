//! Notification fan-out
//!
//! A notification is first persisted, then pushed live to every channel of
//! the recipient through the [`EventPublisher`]. The stored record is the
//! guaranteed fallback: a recipient who is offline, or whose channels die
//! mid-push, still finds it in their notification list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{Collection, Document, DocumentStore, Filter};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::{EventPublisher, OutboundEvent};

/// Default page size when listing notifications
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Category tag of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A listing received an invitation
    Invitation,
    /// A sent invitation was accepted
    InvitationAccepted,
    /// A sent invitation was rejected
    InvitationRejected,
    /// A new message arrived
    Message,
    /// The other participant ended a conversation
    ConversationTerminated,
    /// A listing passed moderation
    ListingApproved,
    /// A listing was refused by moderation
    ListingRejected,
}

/// A persisted notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id
    pub id: String,
    /// Recipient
    pub user_id: String,
    /// Headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Category
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Whether the recipient has seen it
    pub read: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Document for Notification {
    const COLLECTION: &'static str = "notifications";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Persists notifications and pushes them live
#[derive(Clone)]
pub struct NotificationCenter {
    notifications: Collection<Notification>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl NotificationCenter {
    /// Create a notification center
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { notifications: Collection::new(store), publisher, clock }
    }

    /// Persist a notification for `user_id` and push it to their live channels
    pub async fn notify(
        &self,
        user_id: &str,
        title: impl Into<String>,
        message: impl Into<String>,
        notification_type: NotificationType,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.into(),
            message: message.into(),
            notification_type,
            read: false,
            created_at: self.clock.now(),
        };
        self.notifications.insert(&notification).await?;

        tracing::debug!(user = user_id, kind = ?notification_type, "Notification created");
        self.publisher.publish(
            user_id,
            OutboundEvent::Notification { notification: notification.clone() },
        );
        Ok(notification)
    }

    /// Like [`notify`](Self::notify), for callers whose own change is already committed
    ///
    /// A storage failure is logged and swallowed; the caller's operation has
    /// already succeeded and must not be reported as failed.
    pub async fn notify_after_commit(
        &self,
        user_id: &str,
        title: impl Into<String>,
        message: impl Into<String>,
        notification_type: NotificationType,
    ) -> Option<Notification> {
        match self.notify(user_id, title, message, notification_type).await {
            Ok(notification) => Some(notification),
            Err(e) => {
                tracing::warn!(user = user_id, error = %e, "Failed to persist notification");
                None
            }
        }
    }

    /// Notifications for `user_id`, newest first
    pub async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        let mut items = self.notifications.find(&Filter::new().eq("user_id", user_id)).await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    /// Mark one of the recipient's notifications read
    pub async fn mark_read(&self, notification_id: &str, user_id: &str) -> Result<()> {
        let mut notification = self.owned(notification_id, user_id).await?;
        if notification.read {
            return Ok(());
        }
        notification.read = true;
        self.notifications.replace(&notification).await?;
        Ok(())
    }

    /// Mark every unread notification of `user_id` read; returns how many changed
    pub async fn mark_all_read(&self, user_id: &str) -> Result<usize> {
        let unread = self.notifications.find(&Self::unread_filter(user_id)).await?;
        let mut changed = 0;
        for mut notification in unread {
            notification.read = true;
            if self.notifications.replace(&notification).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Delete one of the recipient's notifications
    pub async fn delete(&self, notification_id: &str, user_id: &str) -> Result<()> {
        self.owned(notification_id, user_id).await?;
        self.notifications.delete(notification_id).await?;
        Ok(())
    }

    /// Number of unread notifications for `user_id`
    pub async fn unread_count(&self, user_id: &str) -> Result<usize> {
        Ok(self.notifications.count(&Self::unread_filter(user_id)).await?)
    }

    fn unread_filter(user_id: &str) -> Filter {
        Filter::new().eq("user_id", user_id).eq("read", false)
    }

    // Another user's notification is reported as missing rather than forbidden
    async fn owned(&self, notification_id: &str, user_id: &str) -> Result<Notification> {
        self.notifications
            .get(notification_id)
            .await?
            .filter(|n| n.user_id == user_id)
            .ok_or_else(|| CoreError::not_found(format!("notification {notification_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::ErrorKind;
    use crate::events::{MockEventPublisher, NoopPublisher};
    use storage::MemoryStore;

    fn center_with(publisher: Arc<dyn EventPublisher>) -> NotificationCenter {
        NotificationCenter::new(Arc::new(MemoryStore::new()), publisher, Arc::new(SystemClock))
    }

    fn center() -> NotificationCenter {
        center_with(Arc::new(NoopPublisher))
    }

    #[test]
    fn test_wire_format_uses_type_field() {
        let notification = Notification {
            id: "n1".into(),
            user_id: "u1".into(),
            title: "Yeni Davet".into(),
            message: "m".into(),
            notification_type: NotificationType::InvitationAccepted,
            read: false,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "invitation_accepted");
        assert_eq!(value["read"], false);
    }

    #[tokio::test]
    async fn test_notify_persists_then_publishes() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|user, event| {
                user == "u1"
                    && matches!(event, OutboundEvent::Notification { notification } if notification.title == "Yeni Davet")
            })
            .times(1)
            .return_const(());

        let center = center_with(Arc::new(publisher));
        let created = center
            .notify("u1", "Yeni Davet", "body", NotificationType::Invitation)
            .await
            .unwrap();

        let listed = center.list("u1", DEFAULT_LIST_LIMIT).await.unwrap();
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let center = center();
        for i in 0..5 {
            center
                .notify("u1", format!("t{i}"), "body", NotificationType::Message)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        center.notify("u2", "other", "body", NotificationType::Message).await.unwrap();

        let listed = center.list("u1", 3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].title, "t4");
        assert!(listed.iter().all(|n| n.user_id == "u1"));
    }

    #[tokio::test]
    async fn test_read_state() {
        let center = center();
        let a = center.notify("u1", "a", "b", NotificationType::Message).await.unwrap();
        center.notify("u1", "c", "d", NotificationType::Message).await.unwrap();
        assert_eq!(center.unread_count("u1").await.unwrap(), 2);

        center.mark_read(&a.id, "u1").await.unwrap();
        center.mark_read(&a.id, "u1").await.unwrap();
        assert_eq!(center.unread_count("u1").await.unwrap(), 1);

        assert_eq!(center.mark_all_read("u1").await.unwrap(), 1);
        assert_eq!(center.unread_count("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recipient_scoping() {
        let center = center();
        let n = center.notify("u1", "a", "b", NotificationType::Message).await.unwrap();

        let err = center.mark_read(&n.id, "u2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = center.delete(&n.id, "u2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        center.delete(&n.id, "u1").await.unwrap();
        assert!(center.list("u1", DEFAULT_LIST_LIMIT).await.unwrap().is_empty());
    }
}
