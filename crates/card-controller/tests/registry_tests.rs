//! Integration tests for the meeting channel registry.
//!
//! Rosters come from `MockStore` so tests can count and fail store reads.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use card_controller::actors::{ActorMetrics, MeetingChannelRegistry};
use card_controller::cards::{CardState, ChannelEvent};
use card_controller::config::ChannelSettings;
use card_controller::errors::CcError;
use cc_test_utils::{ConnectionProbe, MockStore, TestParticipant, TEST_MEETING_CODE};
use std::time::Duration;

fn registry() -> MeetingChannelRegistry {
    MeetingChannelRegistry::new(
        "cc-test".to_string(),
        ChannelSettings::default(),
        ActorMetrics::new(),
    )
}

#[tokio::test]
async fn test_concurrent_first_access_reads_roster_once() {
    let registry = registry();
    let store = MockStore::new()
        .with_participant(TestParticipant::host("alice").build(TEST_MEETING_CODE));

    let results = futures::future::join_all(
        (0..10).map(|_| registry.get(TEST_MEETING_CODE, store.as_store())),
    )
    .await;

    let channels: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    let first = channels.first().unwrap();
    assert!(channels.iter().all(|c| c.same_channel(first)));
    assert_eq!(store.list_calls(), 1);
}

#[tokio::test]
async fn test_contains_tracks_get_and_remove() {
    let registry = registry();
    let store = MockStore::new();

    assert!(!registry.contains(TEST_MEETING_CODE).await.unwrap());

    registry
        .get(TEST_MEETING_CODE, store.as_store())
        .await
        .unwrap();
    assert!(registry.contains(TEST_MEETING_CODE).await.unwrap());

    assert!(registry.remove(TEST_MEETING_CODE).await.unwrap());
    assert!(!registry.contains(TEST_MEETING_CODE).await.unwrap());
}

#[tokio::test]
async fn test_channels_are_independent_per_meeting() {
    let registry = registry();
    let alice = TestParticipant::new("alice").build("Meet01");
    let bob = TestParticipant::new("bob").build("Meet02");
    let store = MockStore::new()
        .with_participant(alice.clone())
        .with_participant(bob.clone());

    let first = registry.get("Meet01", store.as_store()).await.unwrap();
    let second = registry.get("Meet02", store.as_store()).await.unwrap();
    assert!(!first.same_channel(&second));

    first
        .handle_event(ChannelEvent::CardChange {
            participation: alice,
            new_state: CardState::Question,
        })
        .await
        .unwrap();

    assert_eq!(first.get_status().await.unwrap().question_count, 1);
    assert_eq!(second.get_status().await.unwrap().question_count, 0);
    assert_eq!(registry.get_status().await.unwrap().channel_count, 2);
}

#[tokio::test]
async fn test_store_failure_is_reported_and_retryable() {
    let registry = registry();
    let store = MockStore::new()
        .with_participant(TestParticipant::host("alice").build(TEST_MEETING_CODE));

    store.fail_lists(true);
    let result = registry.get(TEST_MEETING_CODE, store.as_store()).await;
    assert!(matches!(result, Err(CcError::Store(_))));
    assert!(!registry.contains(TEST_MEETING_CODE).await.unwrap());

    store.fail_lists(false);
    let channel = registry
        .get(TEST_MEETING_CODE, store.as_store())
        .await
        .unwrap();
    assert_eq!(channel.get_status().await.unwrap().participant_count, 1);
}

#[tokio::test]
async fn test_remove_disconnects_observers() {
    let registry = registry();
    let store = MockStore::new();
    let channel = registry
        .get(TEST_MEETING_CODE, store.as_store())
        .await
        .unwrap();

    let (connection, mut probe) = ConnectionProbe::new(8);
    channel.add_connection(connection).await.unwrap();
    assert_eq!(registry.get_status().await.unwrap().connection_count, 1);

    assert!(registry.remove(TEST_MEETING_CODE).await.unwrap());

    probe.wait_disconnected().await;
    assert!(channel.get_status().await.is_err());
}

#[tokio::test]
async fn test_shutdown_reports_state_and_rejects_new_channels() {
    let registry = registry();
    let store = MockStore::new();
    let channel = registry
        .get(TEST_MEETING_CODE, store.as_store())
        .await
        .unwrap();
    let (connection, mut probe) = ConnectionProbe::new(8);
    channel.add_connection(connection).await.unwrap();

    registry.shutdown(Duration::from_secs(5)).await.unwrap();

    probe.wait_disconnected().await;
    assert!(channel.is_cancelled());
    assert!(registry.get("Other1", store.as_store()).await.is_err());
}
