//! End-to-end flows through the exchange core
//!
//! Covers the full invitation lifecycle, the daily allowance, listing caps,
//! block asymmetry, and conversation termination against both store backends.

use app_core::{
    ConflictKind, CoreConfig, CoreError, ErrorKind, Exchange, InvitationStatus, ManualClock,
    NewListing, NoopPublisher, NotificationType, Profile, RateLimitConfig,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use storage::{DocumentStore, KvStore, MemoryStore};

// ============================================================================
// Helpers
// ============================================================================

fn listing(role: &str) -> NewListing {
    NewListing {
        title: "Ankara'dan İzmir'e".into(),
        institution: "MEB".into(),
        role: role.into(),
        current_province: "Ankara".into(),
        desired_province: "İzmir".into(),
        ..Default::default()
    }
}

async fn member(exchange: &Exchange, user_id: &str, name: &str, role: &str) {
    let profile = Profile::new(user_id, "MEB", role, "Ankara").with_display_name(name);
    exchange.profiles().upsert(profile).await.unwrap();
}

fn exchange_on(store: Arc<dyn DocumentStore>, clock: Arc<ManualClock>, config: CoreConfig) -> Exchange {
    Exchange::with_clock(store, Arc::new(NoopPublisher), clock, config)
}

fn memory_exchange(config: CoreConfig) -> (Exchange, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    (exchange_on(Arc::new(MemoryStore::new()), clock.clone(), config), clock)
}

// ============================================================================
// Invitation lifecycle
// ============================================================================

#[tokio::test]
async fn test_invite_accept_message_terminate() {
    let (exchange, _clock) = memory_exchange(CoreConfig::default());
    member(&exchange, "alice", "Ayşe", "Öğretmen").await;
    member(&exchange, "bob", "Burak", "Öğretmen").await;

    let posted = exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();
    let invitation = exchange.send_invitation("alice", &posted.id).await.unwrap();
    assert_eq!(invitation.receiver_id, "bob");
    assert_eq!(invitation.status, InvitationStatus::Pending);

    let received = exchange.notifications().list("bob", 10).await.unwrap();
    assert_eq!(received[0].notification_type, NotificationType::Invitation);

    let response = exchange.respond_to_invitation(&invitation.id, "bob", "accept").await.unwrap();
    assert_eq!(response.invitation.status, InvitationStatus::Accepted);
    let conversation = response.conversation.expect("accepted invitation opens a conversation");
    assert!(conversation.is_participant("alice"));
    assert!(conversation.is_participant("bob"));

    exchange.post_message(&conversation.id, "alice", "Merhaba").await.unwrap();
    exchange.post_message(&conversation.id, "alice", "Takas düşünür müsünüz?").await.unwrap();
    assert_eq!(exchange.conversations().unread_count("bob").await.unwrap(), 2);
    assert_eq!(exchange.mark_read(&conversation.id, "bob").await.unwrap(), 2);
    assert_eq!(exchange.conversations().unread_count("bob").await.unwrap(), 0);

    exchange.terminate_conversation(&conversation.id, "bob").await.unwrap();
    assert!(exchange.conversations().get(&conversation.id).await.unwrap().is_none());

    let alice_notes = exchange.notifications().list("alice", 10).await.unwrap();
    let terminated = alice_notes
        .iter()
        .find(|n| n.notification_type == NotificationType::ConversationTerminated)
        .expect("other participant is told about termination");
    assert_eq!(terminated.message, "Burak sohbeti sonlandırdı");

    // The invitation stays accepted and cannot be re-sent or revived
    let again = exchange.send_invitation("alice", &posted.id).await.unwrap_err();
    assert_eq!(
        again.conflict(),
        Some(ConflictKind::DuplicateInvitation(InvitationStatus::Accepted))
    );
    let reopened = exchange
        .conversations()
        .open_for_invitation(&response.invitation)
        .await
        .unwrap();
    assert!(reopened.is_none());
}

#[tokio::test]
async fn test_reject_then_respond_again() {
    let (exchange, _clock) = memory_exchange(CoreConfig::default());
    member(&exchange, "alice", "Ayşe", "Hemşire").await;
    member(&exchange, "bob", "Burak", "Hemşire").await;
    let posted = exchange.listings().create("bob", listing("hemşire ")).await.unwrap();

    let invitation = exchange.send_invitation("alice", &posted.id).await.unwrap();
    let response = exchange.respond_to_invitation(&invitation.id, "bob", "reject").await.unwrap();
    assert!(response.conversation.is_none());

    let err = exchange.respond_to_invitation(&invitation.id, "bob", "accept").await.unwrap_err();
    assert_eq!(err.conflict(), Some(ConflictKind::AlreadyResolved));

    let err = exchange.respond_to_invitation(&invitation.id, "alice", "accept").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_position_mismatch_and_missing_profile() {
    let (exchange, _clock) = memory_exchange(CoreConfig::default());
    member(&exchange, "alice", "Ayşe", "Polis").await;
    member(&exchange, "bob", "Burak", "Öğretmen").await;
    let posted = exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();

    let err = exchange.send_invitation("alice", &posted.id).await.unwrap_err();
    assert_eq!(err.conflict(), Some(ConflictKind::PositionMismatch));

    let err = exchange.send_invitation("nobody", &posted.id).await.unwrap_err();
    assert_eq!(err.conflict(), Some(ConflictKind::PositionMismatch));

    let err = exchange.send_invitation("alice", "missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Limits
// ============================================================================

#[tokio::test]
async fn test_daily_allowance_resets_after_window() {
    let config = CoreConfig::new()
        .invitation_limit(RateLimitConfig::default().limit(2))
        .max_open_listings(5);
    let (exchange, clock) = memory_exchange(config);
    member(&exchange, "alice", "Ayşe", "Öğretmen").await;
    member(&exchange, "bob", "Burak", "Öğretmen").await;

    let mut listings = Vec::new();
    for _ in 0..4 {
        listings.push(exchange.listings().create("bob", listing("Öğretmen")).await.unwrap());
    }

    exchange.send_invitation("alice", &listings[0].id).await.unwrap();
    exchange.send_invitation("alice", &listings[1].id).await.unwrap();
    let err = exchange.send_invitation("alice", &listings[2].id).await.unwrap_err();
    assert_eq!(err.conflict(), Some(ConflictKind::RateLimited));

    clock.advance(Duration::hours(24) + Duration::seconds(1));
    exchange.send_invitation("alice", &listings[2].id).await.unwrap();
}

#[tokio::test]
async fn test_open_listing_cap() {
    let (exchange, _clock) = memory_exchange(CoreConfig::new().max_open_listings(2));

    let first = exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();
    exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();
    let err = exchange.listings().create("bob", listing("Öğretmen")).await.unwrap_err();
    assert_eq!(err.conflict(), Some(ConflictKind::ListingCap));

    exchange.listings().withdraw(&first.id, "bob").await.unwrap();
    exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();
}

// ============================================================================
// Blocks
// ============================================================================

#[tokio::test]
async fn test_block_is_checked_in_both_directions() {
    let (exchange, _clock) = memory_exchange(CoreConfig::default());
    member(&exchange, "alice", "Ayşe", "Öğretmen").await;
    member(&exchange, "bob", "Burak", "Öğretmen").await;
    let bobs = exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();
    let alices = exchange.listings().create("alice", listing("Öğretmen")).await.unwrap();

    exchange.block_user("alice", "bob", Some("spam".into())).await.unwrap();

    let err = exchange.send_invitation("alice", &bobs.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = exchange.send_invitation("bob", &alices.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = exchange.block_user("alice", "bob", None).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(ConflictKind::AlreadyBlocked)));

    exchange.unblock_user("alice", "bob").await.unwrap();
    exchange.send_invitation("alice", &bobs.id).await.unwrap();
}

#[tokio::test]
async fn test_blocked_recipient_refuses_messages_only_one_way() {
    let (exchange, _clock) = memory_exchange(CoreConfig::default());
    member(&exchange, "alice", "Ayşe", "Öğretmen").await;
    member(&exchange, "bob", "Burak", "Öğretmen").await;
    let posted = exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();
    let invitation = exchange.send_invitation("alice", &posted.id).await.unwrap();
    let conversation = exchange
        .respond_to_invitation(&invitation.id, "bob", "accept")
        .await
        .unwrap()
        .conversation
        .unwrap();

    exchange.block_user("bob", "alice", None).await.unwrap();

    let err = exchange.post_message(&conversation.id, "alice", "selam").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    exchange.post_message(&conversation.id, "bob", "selam").await.unwrap();
}

// ============================================================================
// Persistent backend
// ============================================================================

#[tokio::test]
async fn test_flow_on_kv_store() {
    let store: Arc<dyn DocumentStore> = Arc::new(KvStore::temporary().unwrap());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let exchange = exchange_on(store, clock, CoreConfig::default());
    member(&exchange, "alice", "Ayşe", "Öğretmen").await;
    member(&exchange, "bob", "Burak", "Öğretmen").await;

    let posted = exchange.listings().create("bob", listing("Öğretmen")).await.unwrap();
    let invitation = exchange.send_invitation("alice", &posted.id).await.unwrap();
    let err = exchange.send_invitation("alice", &posted.id).await.unwrap_err();
    assert_eq!(
        err.conflict(),
        Some(ConflictKind::DuplicateInvitation(InvitationStatus::Pending))
    );

    let response = exchange.respond_to_invitation(&invitation.id, "bob", "accept").await.unwrap();
    let conversation = response.conversation.unwrap();
    let message = exchange.post_message(&conversation.id, "bob", "Merhaba").await.unwrap();
    assert_eq!(message.recipient_id, "alice");

    let listed = exchange.conversations().list_for("alice").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].last_message.as_ref().unwrap().content, "Merhaba");
}
