//! Push-driven reconciliation against the in-process server and hub

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

use roomsync::flow::{
    load_location, ChannelState, FetchFailure, FlowError, ReconcileEvent, ReconciliationChannel,
    RefreshOutcome, RefreshScope,
};
use roomsync::network::simulated::{SimPushHub, SimResponse, SimServer};
use roomsync::network::{GroupKey, HypermediaClient, Method, Session};
use roomsync::types::{Room, RoomStatus};
use roomsync::{EngineConfig, ResourceMirror};

fn room_json(id: i64, status: u8, allocations: Value) -> Value {
    json!({
        "roomId": id,
        "location": "H7",
        "roomName": format!("R{}", id),
        "capacity": 4,
        "status": status,
        "roomAllocation": allocations,
        "links": [
            { "rel": "self", "href": format!("/api/rooms/{}", id), "method": "GET" },
            { "rel": "allot", "href": "/api/allot", "method": "POST" }
        ]
    })
}

fn empty_room(id: i64) -> Value {
    room_json(id, 1, json!([]))
}

fn taken_room(id: i64, claimant: &str, partial: Option<i32>) -> Value {
    let status = if partial.is_some() { 3 } else { 2 };
    room_json(
        id,
        status,
        json!([{ "sno": id * 10, "roomId": id, "contingentLeaderNo": claimant, "partial": partial }]),
    )
}

fn building_json(rooms: Vec<Value>) -> Value {
    json!({
        "location": "H7",
        "locationFullName": "Hostel 7",
        "defaultCapacity": 4,
        "room": rooms,
        "links": [{ "rel": "self", "href": "/api/buildings/H7", "method": "GET" }]
    })
}

fn parse_room(value: Value) -> Room {
    serde_json::from_value(value).unwrap()
}

struct Harness {
    server: Arc<SimServer>,
    hub: Arc<SimPushHub>,
    mirror: Arc<ResourceMirror>,
    channel: Arc<ReconciliationChannel>,
    events: broadcast::Receiver<ReconcileEvent>,
}

async fn harness() -> Harness {
    harness_with(EngineConfig::default(), |_| {}).await
}

async fn harness_with(config: EngineConfig, before_start: impl FnOnce(&SimPushHub)) -> Harness {
    let server = SimServer::new();
    server.route(
        Method::Get,
        "/api/spec",
        json!([
            { "rel": "building", "href": "/api/buildings/H7", "method": "GET" },
            { "rel": "building_websocket", "href": "/hub/building", "method": "GET" },
            { "rel": "room", "href": "/api/rooms/{id}", "method": "GET" }
        ]),
    );
    server.route(
        Method::Get,
        "/api/buildings/H7",
        building_json(vec![empty_room(5), empty_room(7), empty_room(9)]),
    );

    let client = HypermediaClient::new(server.clone(), "/api/spec");
    let session = Session::empty();
    client.refresh_session(&session).await.unwrap();

    let mirror = Arc::new(ResourceMirror::new());
    load_location(&client, &session.resolve("building"), &mirror)
        .await
        .unwrap();

    let hub = SimPushHub::new();
    before_start(&hub);
    let channel = ReconciliationChannel::start(
        GroupKey::location("H7"),
        client,
        session,
        Arc::clone(&mirror),
        hub.clone(),
        &config,
    );
    let events = channel.events();
    wait_for_state(&channel, ChannelState::Connected).await;

    Harness {
        server,
        hub,
        mirror,
        channel,
        events,
    }
}

async fn wait_for_state(channel: &ReconciliationChannel, target: ChannelState) {
    let mut rx = channel.state_changes();
    timeout(Duration::from_secs(60), async {
        while *rx.borrow_and_update() != target {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("channel never reached {}", target));
}

async fn next_refresh(events: &mut broadcast::Receiver<ReconcileEvent>) -> RefreshOutcome {
    timeout(Duration::from_secs(60), async {
        loop {
            if let ReconcileEvent::Refreshed(outcome) = events.recv().await.unwrap() {
                return outcome;
            }
        }
    })
    .await
    .expect("no refresh completed")
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_updates_only_fetched_rooms() {
    let mut h = harness().await;
    h.server
        .route(Method::Get, "/api/rooms/7", taken_room(7, "CL0042", None));
    h.server
        .route_error(Method::Get, "/api/rooms/5", 500, "database timeout");
    let room5_before = h.mirror.get(5).unwrap();

    assert_eq!(h.hub.publish(&GroupKey::location("H7"), vec![5, 7]), 1);
    let outcome = next_refresh(&mut h.events).await;

    assert_eq!(outcome.scope, RefreshScope::Rooms([5, 7].into_iter().collect()));
    assert_eq!(outcome.updated, vec![7]);
    assert_eq!(outcome.changed, vec![7]);
    assert!(!outcome.is_complete());
    assert!(matches!(
        outcome.failed.as_slice(),
        [FetchFailure::Room { room_id: 5, message }] if message.contains("database timeout")
    ));

    assert_eq!(h.mirror.get(7).unwrap().status, RoomStatus::Occupied);
    assert_eq!(h.mirror.get(5).unwrap(), room5_before);
    assert_eq!(h.channel.state(), ChannelState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_slow_older_response_is_discarded() {
    let mut h = harness().await;
    let stale = taken_room(9, "OLD", None);
    let fresh = taken_room(9, "NEW", Some(1));

    h.server.enqueue(
        Method::Get,
        "/api/rooms/9",
        SimResponse::ok(stale).after(Duration::from_millis(100)),
    );
    h.hub.publish(&GroupKey::location("H7"), vec![9]);
    sleep(Duration::from_millis(1)).await;

    h.server.enqueue(
        Method::Get,
        "/api/rooms/9",
        SimResponse::ok(fresh.clone()).after(Duration::from_millis(10)),
    );
    h.hub.publish(&GroupKey::location("H7"), vec![9]);

    let mut applied = Vec::new();
    let mut superseded = Vec::new();
    timeout(Duration::from_secs(60), async {
        while applied.is_empty() || superseded.is_empty() {
            match h.events.recv().await.unwrap() {
                ReconcileEvent::Refreshed(outcome) => applied.push(outcome.token),
                ReconcileEvent::Superseded { token, by } => superseded.push((token, by)),
                ReconcileEvent::StateChanged(_) => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(applied, vec![2]);
    assert_eq!(superseded, vec![(1, 2)]);
    assert_eq!(h.mirror.get(9).unwrap(), parse_room(fresh));
    assert_eq!(h.server.request_count(Method::Get, "/api/rooms/9"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_arrival_order_does_not_change_result() {
    let fresh = taken_room(9, "NEW", Some(2));

    for (first_delay, second_delay) in [(100, 10), (10, 100)] {
        let mut h = harness().await;
        h.server.enqueue(
            Method::Get,
            "/api/rooms/9",
            SimResponse::ok(taken_room(9, "OLD", None)).after(Duration::from_millis(first_delay)),
        );
        h.hub.publish(&GroupKey::location("H7"), vec![9]);
        sleep(Duration::from_millis(1)).await;
        h.server.enqueue(
            Method::Get,
            "/api/rooms/9",
            SimResponse::ok(fresh.clone()).after(Duration::from_millis(second_delay)),
        );
        h.hub.publish(&GroupKey::location("H7"), vec![9]);

        let outcome = next_refresh(&mut h.events).await;
        assert_eq!(outcome.token, 2);
        sleep(Duration::from_millis(200)).await;

        assert_eq!(h.mirror.get(9).unwrap(), parse_room(fresh.clone()));
        assert_eq!(h.mirror.version(), 2, "only one point update applied");
    }
}

#[tokio::test(start_paused = true)]
async fn test_newer_request_absorbs_older_scope_and_waiters() {
    let h = harness().await;
    h.server.respond(
        Method::Get,
        "/api/rooms/5",
        SimResponse::ok(taken_room(5, "A", None)).after(Duration::from_millis(50)),
    );
    h.server.respond(
        Method::Get,
        "/api/rooms/7",
        SimResponse::ok(taken_room(7, "B", None)).after(Duration::from_millis(50)),
    );

    let first = {
        let channel = Arc::clone(&h.channel);
        tokio::spawn(async move { channel.refresh(vec![5]).await })
    };
    sleep(Duration::from_millis(1)).await;
    let second = h.channel.refresh(vec![7]).await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(second.scope, RefreshScope::Rooms([5, 7].into_iter().collect()));
    assert_eq!(h.mirror.get(5).unwrap().allocations[0].claimant_id, "A");
    assert_eq!(h.mirror.get(7).unwrap().allocations[0].claimant_id, "B");
}

#[tokio::test(start_paused = true)]
async fn test_notification_burst_lands_as_one_widened_refetch() {
    let mut h = harness().await;
    for (id, claimant) in [(5, "A"), (7, "B"), (9, "C")] {
        h.server.respond(
            Method::Get,
            &format!("/api/rooms/{}", id),
            SimResponse::ok(taken_room(id, claimant, None)).after(Duration::from_millis(50)),
        );
    }

    // Each notification arrives well inside the previous round trip.
    for id in [5, 7, 9] {
        h.hub.publish(&GroupKey::location("H7"), vec![id]);
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.mirror.version(), 1, "nothing applied mid-burst");

    let outcome = next_refresh(&mut h.events).await;
    assert_eq!(outcome.token, 3);
    assert_eq!(outcome.scope, RefreshScope::Rooms([5, 7, 9].into_iter().collect()));
    assert_eq!(outcome.updated, vec![5, 7, 9]);
    assert_eq!(h.mirror.version(), 2);
    assert_eq!(h.mirror.get(9).unwrap().allocations[0].claimant_id, "C");
}

#[tokio::test(start_paused = true)]
async fn test_repeated_notification_is_idempotent() {
    let mut h = harness().await;
    h.server
        .route(Method::Get, "/api/rooms/7", taken_room(7, "CL0042", Some(2)));

    h.hub.publish(&GroupKey::location("H7"), vec![7]);
    let first = next_refresh(&mut h.events).await;
    let state = (h.mirror.rooms(), h.mirror.version());

    h.hub.publish(&GroupKey::location("H7"), vec![7]);
    let second = next_refresh(&mut h.events).await;

    assert_eq!(first.changed, vec![7]);
    assert_eq!(second.updated, vec![7]);
    assert!(second.changed.is_empty());
    assert_eq!((h.mirror.rooms(), h.mirror.version()), state);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_rooms_are_not_fetched() {
    let h = harness().await;
    let outcome = h.channel.refresh(vec![99]).await.unwrap();
    assert!(outcome.updated.is_empty());
    assert_eq!(h.server.request_count(Method::Get, "/api/rooms/99"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_turns_completions_into_noops() {
    let h = harness().await;
    h.server.respond(
        Method::Get,
        "/api/rooms/5",
        SimResponse::ok(taken_room(5, "LATE", None)).after(Duration::from_millis(100)),
    );
    let version = h.mirror.version();

    h.hub.publish(&GroupKey::location("H7"), vec![5]);
    sleep(Duration::from_millis(1)).await;
    assert_eq!(h.channel.state(), ChannelState::Refetching);

    h.channel.disconnect();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(h.server.request_count(Method::Get, "/api/rooms/5"), 1);
    assert_eq!(h.mirror.version(), version);
    assert_eq!(h.mirror.get(5).unwrap().status, RoomStatus::Empty);
    assert_eq!(h.channel.state(), ChannelState::Disconnected);
    assert!(!h.channel.is_alive());
    assert_eq!(h.hub.connection_count(), 0);
    assert_eq!(h.hub.publish(&GroupKey::location("H7"), vec![5]), 0);
    assert_eq!(h.channel.refresh(vec![5]).await, Err(FlowError::ShutDown));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.hub.connect_count(), 1, "no reconnect after teardown");
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_backoff_and_reloads() {
    let mut h = harness().await;
    assert_eq!(h.hub.connect_count(), 1);

    h.server.route(
        Method::Get,
        "/api/buildings/H7",
        building_json(vec![taken_room(5, "CL0042", None), empty_room(7), empty_room(9)]),
    );
    h.hub.drop_all();
    wait_for_state(&h.channel, ChannelState::Disconnected).await;
    let dropped_at = Instant::now();

    wait_for_state(&h.channel, ChannelState::Connected).await;
    assert!(dropped_at.elapsed() >= Duration::from_millis(500));
    assert_eq!(h.hub.connect_count(), 2);

    let outcome = next_refresh(&mut h.events).await;
    assert_eq!(outcome.scope, RefreshScope::Full);
    assert_eq!(outcome.updated, vec![5, 7, 9]);
    assert_eq!(h.mirror.get(5).unwrap().status, RoomStatus::Occupied);

    // The new connection still delivers notifications.
    h.server.route(Method::Get, "/api/rooms/9", taken_room(9, "X", Some(1)));
    assert_eq!(h.hub.publish(&GroupKey::location("H7"), vec![9]), 1);
    let outcome = next_refresh(&mut h.events).await;
    assert_eq!(outcome.updated, vec![9]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_refused_connections_indefinitely() {
    let started = Instant::now();
    let h = harness_with(EngineConfig::default(), |hub| hub.refuse_next(3)).await;
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(h.hub.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reload_on_reconnect_can_be_disabled() {
    let config = EngineConfig {
        reload_on_reconnect: false,
        ..EngineConfig::default()
    };
    let h = harness_with(config, |_| {}).await;
    h.hub.drop_all();
    wait_for_state(&h.channel, ChannelState::Disconnected).await;
    wait_for_state(&h.channel, ChannelState::Connected).await;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(h.server.request_count(Method::Get, "/api/buildings/H7"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_reload_replaces_location() {
    let h = harness().await;
    h.server.route(
        Method::Get,
        "/api/buildings/H7",
        building_json(vec![empty_room(5), empty_room(11)]),
    );
    let outcome = h.channel.reload().await.unwrap();
    assert_eq!(outcome.scope, RefreshScope::Full);
    assert_eq!(h.mirror.room_ids(), vec![5, 11]);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_disconnects() {
    let h = harness().await;
    let hub = Arc::clone(&h.hub);
    drop(h);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(hub.connection_count(), 0);
}
