//! Allocation transactions end to end against the in-process server

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use roomsync::allocation::{AllocationTransaction, Selection, TransactionError, ValidationError};
use roomsync::flow::{load_location, ChannelState, ClaimantMirror, ReconcileEvent, ReconciliationChannel};
use roomsync::network::simulated::{SimPushHub, SimServer};
use roomsync::network::{GroupKey, HypermediaClient, Method, Session};
use roomsync::types::{Room, RoomStatus, Sex};
use roomsync::{EngineConfig, ResourceMirror};

const ALLOT: &str = "/api/arrivals/9/allot";
const CLAIMANT: &str = "/api/arrivals/9";

fn links(id: i64, rels: &[&str]) -> Value {
    let mut links = vec![json!({ "rel": "self", "href": format!("/api/rooms/{}", id), "method": "GET" })];
    for rel in rels {
        links.push(json!({ "rel": rel, "href": format!("/api/rooms/{}/{}", id, rel), "method": "POST" }));
    }
    Value::Array(links)
}

fn building() -> Value {
    json!({
        "location": "H7",
        "locationFullName": "Hostel 7",
        "defaultCapacity": 4,
        "room": [
            { "roomId": 1, "location": "H7", "roomName": "G-1", "capacity": 4, "status": 1,
              "roomAllocation": [], "links": links(1, &["allot", "mark"]) },
            { "roomId": 2, "location": "H7", "roomName": "G-2", "capacity": 4, "status": 2,
              "roomAllocation": [{ "sno": 20, "roomId": 2, "contingentLeaderNo": "OTHER", "partial": null }],
              "links": links(2, &["allot", "mark"]) },
            { "roomId": 3, "location": "H7", "roomName": "G-3", "capacity": 4, "status": 3,
              "roomAllocation": [{ "sno": 30, "roomId": 3, "contingentLeaderNo": "CL0042", "partial": 2,
                                   "links": [{ "rel": "delete", "href": "/api/allocations/30", "method": "DELETE" }] }],
              "links": links(3, &["allot", "mark"]) },
            { "roomId": 4, "location": "H7", "roomName": "G-4", "capacity": 2, "status": 4,
              "roomAllocation": [], "links": links(4, &["mark"]) }
        ],
        "links": [
            { "rel": "self", "href": "/api/buildings/H7", "method": "GET" },
            { "rel": "mark", "href": "/api/buildings/H7/mark", "method": "POST" }
        ]
    })
}

fn demand(allotted_male: u32) -> Value {
    json!({
        "contingentArrivalNo": 9,
        "contingentLeaderNo": "CL0042",
        "male": 12,
        "female": 0,
        "allottedMale": allotted_male,
        "allottedFemale": 0,
        "approved": true,
        "links": [
            { "rel": "self", "href": CLAIMANT, "method": "GET" },
            { "rel": "allot", "href": ALLOT, "method": "POST" }
        ]
    })
}

struct Desk {
    server: Arc<SimServer>,
    client: HypermediaClient,
    session: Arc<Session>,
    mirror: Arc<ResourceMirror>,
    claimant: Arc<ClaimantMirror>,
}

async fn desk() -> Desk {
    let server = SimServer::new();
    server.route(
        Method::Get,
        "/api/spec",
        json!([{ "rel": "building_websocket", "href": "/hub/building", "method": "GET" }]),
    );
    server.route(Method::Get, "/api/buildings/H7", building());

    let client = HypermediaClient::new(server.clone(), "/api/spec");
    let session = Session::empty();
    client.refresh_session(&session).await.unwrap();

    let mirror = Arc::new(ResourceMirror::new());
    load_location(
        &client,
        &roomsync::network::Link::new("self", "/api/buildings/H7", Method::Get),
        &mirror,
    )
    .await
    .unwrap();

    let claimant = Arc::new(ClaimantMirror::new(
        client.clone(),
        serde_json::from_value(demand(2)).unwrap(),
    ));

    Desk {
        server,
        client,
        session,
        mirror,
        claimant,
    }
}

impl Desk {
    fn transaction(&self) -> AllocationTransaction {
        AllocationTransaction::new(self.client.clone(), Arc::clone(&self.mirror))
            .with_claimant(Arc::clone(&self.claimant))
    }
}

fn select(ids: &[i64]) -> Selection {
    let mut selection = Selection::new();
    for id in ids {
        selection.select(*id);
    }
    selection
}

#[tokio::test]
async fn test_room_held_by_other_is_the_only_error() {
    let desk = desk().await;
    let errors = desk.transaction().validate(&select(&[1, 2]));
    assert_eq!(
        errors,
        vec![ValidationError::NotAllocable {
            room_id: 2,
            room_name: "G-2".to_string()
        }]
    );
}

#[tokio::test]
async fn test_submit_sends_one_batch_and_refreshes_claimant() {
    let desk = desk().await;
    desk.server.route(Method::Post, ALLOT, Value::Null);
    desk.server.route(Method::Get, CLAIMANT, demand(7));
    let version = desk.mirror.version();

    let mut selection = select(&[1, 3]);
    selection.set_partial(3, false, Some("1"));
    let committed = desk.transaction().submit(&selection).await.unwrap();

    assert_eq!(committed.rooms, vec![1, 3]);
    assert_eq!(committed.claimant.unwrap().allotted_male, 7);
    assert_eq!(desk.claimant.current().remaining(Sex::Male), 5);

    let batches: Vec<_> = desk
        .server
        .requests()
        .into_iter()
        .filter(|r| r.href == ALLOT)
        .collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].method, Method::Post);
    assert_eq!(
        batches[0].body,
        Some(json!([{ "roomId": 1 }, { "roomId": 3, "partial": 1 }]))
    );

    // Nothing is applied locally before reconciliation.
    assert_eq!(desk.mirror.version(), version);
    assert!(desk.mirror.get(1).unwrap().allocations.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sent_batch_always_matches_validated_selection() {
    let desk = desk().await;
    desk.server.route(Method::Post, ALLOT, Value::Null);
    desk.server.route(Method::Get, CLAIMANT, demand(2));

    let free = desk.mirror.get(1).unwrap();
    let taken: Room = serde_json::from_value(json!({
        "roomId": 1, "location": "H7", "roomName": "G-1", "capacity": 4, "status": 2,
        "roomAllocation": [{ "sno": 11, "roomId": 1, "contingentLeaderNo": "OTHER" }],
        "links": links(1, &["allot", "mark"])
    }))
    .unwrap();

    // Room 1 keeps changing hands while submits are validated.
    let stop = Arc::new(AtomicBool::new(false));
    let flipper = {
        let mirror = Arc::clone(&desk.mirror);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut occupied = false;
            while !stop.load(Ordering::Relaxed) {
                let room = if occupied { taken.clone() } else { free.clone() };
                mirror.apply_point_updates(vec![room]);
                occupied = !occupied;
            }
        })
    };

    let mut selection = select(&[1, 3]);
    selection.set_partial(3, false, Some("1"));
    let transaction = desk.transaction();
    let mut committed = 0;
    for _ in 0..2_000 {
        match transaction.submit(&selection).await {
            Ok(c) => {
                assert_eq!(c.rooms, vec![1, 3]);
                committed += 1;
            }
            Err(TransactionError::Invalid(errors)) => {
                let rooms: Vec<_> = errors.iter().map(|e| e.room_id()).collect();
                assert_eq!(rooms, vec![Some(1)]);
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    stop.store(true, Ordering::Relaxed);
    flipper.join().unwrap();

    let batches: Vec<_> = desk
        .server
        .requests()
        .into_iter()
        .filter(|r| r.href == ALLOT)
        .collect();
    assert_eq!(batches.len(), committed);
    for batch in batches {
        assert_eq!(
            batch.body,
            Some(json!([{ "roomId": 1 }, { "roomId": 3, "partial": 1 }]))
        );
    }
}

#[tokio::test]
async fn test_rejection_is_surfaced_verbatim() {
    let desk = desk().await;
    let message = "Room G-1 was allotted to CL0077 by Desk 2 a moment ago";
    desk.server.route_error(Method::Post, ALLOT, 409, message);
    let version = desk.mirror.version();

    let err = desk.transaction().submit(&select(&[1])).await.unwrap_err();
    assert_eq!(
        err,
        TransactionError::Rejected {
            message: message.to_string()
        }
    );
    assert_eq!(desk.mirror.version(), version);
    assert_eq!(desk.server.request_count(Method::Post, ALLOT), 1);
    assert_eq!(desk.server.request_count(Method::Get, CLAIMANT), 0);
    assert_eq!(desk.claimant.current().allotted_male, 2);
}

#[tokio::test]
async fn test_invalid_selection_sends_nothing() {
    let desk = desk().await;
    let mut selection = select(&[2, 3, 4]);
    selection.set_partial(3, true, Some("0"));

    match desk.transaction().submit(&selection).await {
        Err(TransactionError::Invalid(errors)) => {
            let rooms: Vec<_> = errors.iter().filter_map(|e| e.room_id()).collect();
            assert_eq!(rooms, vec![2, 3, 4]);
        }
        other => panic!("expected validation errors, got {:?}", other),
    }
    assert_eq!(desk.server.request_count(Method::Post, ALLOT), 0);

    assert_eq!(
        desk.transaction().submit(&Selection::new()).await,
        Err(TransactionError::EmptySelection)
    );
}

#[tokio::test]
async fn test_demand_limits_selection() {
    let desk = desk().await;
    let transaction = desk.transaction().with_sex(Sex::Male);

    // 12 requested, 2 already allotted.
    let mut selection = select(&[1, 3]);
    selection.set_partial(3, false, Some("2"));
    assert!(transaction.validate(&selection).is_empty());

    selection.set_partial(1, true, Some("7"));
    assert!(transaction.validate(&selection).is_empty());

    selection.set_partial(1, true, Some("9"));
    assert_eq!(
        transaction.validate(&selection),
        vec![ValidationError::ExceedsDemand {
            requested: 11,
            remaining: 10
        }]
    );
}

#[tokio::test]
async fn test_mark_batch_uses_building_link() {
    let desk = desk().await;
    desk.server.route(Method::Post, "/api/buildings/H7/mark", Value::Null);
    let transaction = desk.transaction();

    let mut selection = Selection::new();
    selection.set_marking(true);
    for id in [2, 4] {
        assert!(selection.toggle(&desk.mirror.get(id).unwrap()));
    }
    assert!(!transaction.has_unmarkable(&selection));
    assert!(transaction.has_unallotable(&selection));

    let marked = transaction.mark(&selection, RoomStatus::Empty).await.unwrap();
    assert_eq!(marked, vec![2, 4]);
    let requests = desk.server.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.href, "/api/buildings/H7/mark");
    assert_eq!(
        last.body,
        Some(json!([{ "roomId": 2, "status": 1 }, { "roomId": 4, "status": 1 }]))
    );
}

#[tokio::test]
async fn test_unallocate_fires_delete_link() {
    let desk = desk().await;
    desk.server.route(Method::Delete, "/api/allocations/30", Value::Null);
    desk.server.route(Method::Get, CLAIMANT, demand(0));

    let allocation = desk.mirror.get(3).unwrap().allocations[0].clone();
    let committed = desk.transaction().unallocate(&allocation).await.unwrap();

    assert_eq!(committed.rooms, vec![3]);
    assert_eq!(desk.claimant.current().allotted_male, 0);
    assert_eq!(desk.server.request_count(Method::Delete, "/api/allocations/30"), 1);
    // Still held locally until the server says otherwise.
    assert_eq!(desk.mirror.get(3).unwrap().allocations.len(), 1);

    let mut without_link = allocation;
    without_link.links.clear();
    let err = desk.transaction().unallocate(&without_link).await.unwrap_err();
    assert!(matches!(err, TransactionError::Hypermedia(_)));
}

#[tokio::test(start_paused = true)]
async fn test_commit_triggers_room_refetch() {
    let desk = desk().await;
    desk.server.route(Method::Post, ALLOT, Value::Null);
    desk.server.route(Method::Get, CLAIMANT, demand(6));
    desk.server.route(
        Method::Get,
        "/api/rooms/1",
        json!({ "roomId": 1, "location": "H7", "roomName": "G-1", "capacity": 4, "status": 2,
                "roomAllocation": [{ "sno": 10, "roomId": 1, "contingentLeaderNo": "CL0042" }],
                "links": links(1, &["mark"]) }),
    );

    let hub = SimPushHub::new();
    let channel = ReconciliationChannel::start(
        GroupKey::location("H7"),
        desk.client.clone(),
        Arc::clone(&desk.session),
        Arc::clone(&desk.mirror),
        hub,
        &EngineConfig::default(),
    );
    let mut events = channel.events();
    let mut state = channel.state_changes();
    while *state.borrow_and_update() != ChannelState::Connected {
        state.changed().await.unwrap();
    }

    desk.transaction()
        .with_reconciler(Arc::clone(&channel))
        .submit(&select(&[1]))
        .await
        .unwrap();

    let outcome = timeout(Duration::from_secs(10), async {
        loop {
            if let ReconcileEvent::Refreshed(outcome) = events.recv().await.unwrap() {
                return outcome;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(outcome.updated, vec![1]);
    assert_eq!(desk.mirror.get(1).unwrap().status, RoomStatus::Occupied);
}
