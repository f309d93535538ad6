//! Push-driven scoped refetch with request-token supersession
//!
//! Two tasks back each channel. The connection task owns the push
//! connection: it connects, joins the group, forwards notifications and
//! reconnects after a fixed backoff for as long as the channel is alive.
//! The reconcile loop owns the request tokens: every refetch gets a new,
//! strictly larger token, and a response is applied only while its token
//! is still the latest issued. A request issued while another is in flight
//! absorbs the older request's scope and waiters, so discarding the older
//! response never loses an update.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::error::FlowError;
use super::state::ChannelState;
use crate::config::EngineConfig;
use crate::mirror::ResourceMirror;
use crate::network::push::PUSH_ENDPOINT_REL;
use crate::network::{
    GroupKey, HypermediaClient, Link, PushConnection, PushError, PushMessage, PushTransport,
    Session, TemplateParams,
};
use crate::types::{Building, Room, RoomId};

/// Manifest relation used to fetch a room that carries no `self` link.
const ROOM_REL: &str = "room";

/// What a refetch covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RefreshScope {
    Rooms(BTreeSet<RoomId>),
    Full,
}

impl RefreshScope {
    /// Union of two scopes. A full reload covers everything.
    pub fn merge(self, other: RefreshScope) -> RefreshScope {
        match (self, other) {
            (RefreshScope::Rooms(mut a), RefreshScope::Rooms(b)) => {
                a.extend(b);
                RefreshScope::Rooms(a)
            }
            _ => RefreshScope::Full,
        }
    }
}

/// One part of a refetch that did not come back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FetchFailure {
    Room { room_id: RoomId, message: String },
    Location { message: String },
}

/// Result of an applied refetch, handed to completion waiters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshOutcome {
    pub token: u64,
    pub scope: RefreshScope,
    /// Rooms fetched and applied.
    pub updated: Vec<RoomId>,
    /// Subset of `updated` whose content differed from the mirror.
    pub changed: Vec<RoomId>,
    pub failed: Vec<FetchFailure>,
    pub completed_at: DateTime<Utc>,
}

impl RefreshOutcome {
    fn nothing(token: u64) -> Self {
        Self {
            token,
            scope: RefreshScope::Rooms(BTreeSet::new()),
            updated: Vec::new(),
            changed: Vec::new(),
            failed: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Events broadcast by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileEvent {
    StateChanged(ChannelState),
    Refreshed(RefreshOutcome),
    /// The response for `token` arrived after `by` was issued and was dropped.
    Superseded { token: u64, by: u64 },
}

type Reply = oneshot::Sender<Result<RefreshOutcome, FlowError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Connected { rejoined: bool },
    Disconnected,
}

enum FetchResult {
    Rooms(Vec<Result<Room, FetchFailure>>),
    Location(Result<Building, String>),
}

enum Command {
    Refresh { ids: Vec<RoomId>, reply: Option<Reply> },
    Reload { reply: Option<Reply> },
    Link(LinkState),
    FetchDone { token: u64, result: FetchResult },
}

/// Live subscription for one location.
///
/// Dropping the handle disconnects it.
pub struct ReconciliationChannel {
    group: GroupKey,
    alive: Arc<AtomicBool>,
    commands_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<ReconcileEvent>,
    state_rx: watch::Receiver<ChannelState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ReconciliationChannel {
    /// Spawn the connection task and reconcile loop for `group`.
    ///
    /// The mirror should already hold the location (see [`load_location`]);
    /// notifications for rooms it does not know are ignored.
    pub fn start(
        group: GroupKey,
        client: HypermediaClient,
        session: Arc<Session>,
        mirror: Arc<ResourceMirror>,
        transport: Arc<dyn PushTransport>,
        config: &EngineConfig,
    ) -> Arc<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (shutdown_tx, _) = broadcast::channel(1);

        let reconcile = ReconcileLoop {
            client,
            session: Arc::clone(&session),
            mirror,
            alive: Arc::clone(&alive),
            commands_tx: commands_tx.clone(),
            events_tx: events_tx.clone(),
            state_tx,
            reload_on_reconnect: config.reload_on_reconnect,
            link: LinkState::Disconnected,
            next_token: 0,
            in_flight: None,
        };
        tokio::spawn(reconcile.run(commands_rx, shutdown_tx.subscribe()));

        let connection = ConnectionTask {
            group: group.clone(),
            session,
            transport,
            alive: Arc::clone(&alive),
            commands_tx: commands_tx.clone(),
            backoff: config.reconnect_backoff(),
        };
        tokio::spawn(connection.run(shutdown_tx.subscribe()));

        log::info!("Reconciliation channel started for {}", group);
        Arc::new(Self {
            group,
            alive,
            commands_tx,
            events_tx,
            state_rx,
            shutdown_tx,
        })
    }

    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Watch the channel state.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queue a scoped refetch of `ids` without waiting for it.
    pub fn request_refresh(&self, ids: Vec<RoomId>) {
        self.send(Command::Refresh { ids, reply: None });
    }

    /// Refetch `ids` and wait for the request that finally covers them.
    pub async fn refresh(&self, ids: Vec<RoomId>) -> Result<RefreshOutcome, FlowError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Refresh {
            ids,
            reply: Some(reply),
        }) {
            return Err(FlowError::ShutDown);
        }
        rx.await.map_err(|_| FlowError::ShutDown)?
    }

    /// Queue a full reload of the location.
    pub fn request_reload(&self) {
        self.send(Command::Reload { reply: None });
    }

    /// Reload the whole location and wait for it.
    pub async fn reload(&self) -> Result<RefreshOutcome, FlowError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Reload { reply: Some(reply) }) {
            return Err(FlowError::ShutDown);
        }
        rx.await.map_err(|_| FlowError::ShutDown)?
    }

    fn send(&self, command: Command) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.commands_tx.send(command).is_ok()
    }

    /// Stop reconnecting and turn every in-flight completion into a no-op.
    /// Requests already on the wire are left to finish.
    pub fn disconnect(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            log::info!("Reconciliation channel for {} torn down", self.group);
            let _ = self.shutdown_tx.send(());
        }
    }
}

impl Drop for ReconciliationChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Fetch the building behind `link` and load it into `mirror`.
pub async fn load_location(
    client: &HypermediaClient,
    link: &Link,
    mirror: &ResourceMirror,
) -> Result<(), FlowError> {
    if link.is_empty() {
        return Err(FlowError::MissingLink("self".to_string()));
    }
    let building: Building = client.invoke(link).await?;
    log::info!(
        "Loaded {} ({} rooms)",
        building.location,
        building.rooms.len()
    );
    mirror.load_full(building);
    Ok(())
}

struct InFlight {
    token: u64,
    scope: RefreshScope,
    waiters: Vec<Reply>,
}

struct ReconcileLoop {
    client: HypermediaClient,
    session: Arc<Session>,
    mirror: Arc<ResourceMirror>,
    alive: Arc<AtomicBool>,
    commands_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<ReconcileEvent>,
    state_tx: watch::Sender<ChannelState>,
    reload_on_reconnect: bool,
    link: LinkState,
    next_token: u64,
    in_flight: Option<InFlight>,
}

impl ReconcileLoop {
    async fn run(
        mut self,
        mut commands_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                command = commands_rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        // Dropping the waiters resolves them with `ShutDown`.
        self.in_flight = None;
        self.link = LinkState::Disconnected;
        self.publish_state();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Refresh { ids, reply } => self.on_refresh(ids, reply),
            Command::Reload { reply } => self.issue(RefreshScope::Full, reply),
            Command::Link(link) => self.on_link(link),
            Command::FetchDone { token, result } => self.on_fetch_done(token, result),
        }
    }

    fn on_link(&mut self, link: LinkState) {
        self.link = link;
        self.publish_state();
        if let LinkState::Connected { rejoined: true } = link {
            if self.reload_on_reconnect {
                log::info!("Re-joined after a disconnect, reloading location");
                self.issue(RefreshScope::Full, None);
            }
        }
    }

    fn on_refresh(&mut self, ids: Vec<RoomId>, reply: Option<Reply>) {
        let known: BTreeSet<RoomId> = ids
            .into_iter()
            .filter(|id| {
                let known = self.mirror.contains(*id);
                if !known {
                    log::debug!("Notification for unknown room {}", id);
                }
                known
            })
            .collect();

        if known.is_empty() {
            match (&mut self.in_flight, reply) {
                (Some(flight), Some(reply)) => flight.waiters.push(reply),
                (None, Some(reply)) => {
                    let _ = reply.send(Ok(RefreshOutcome::nothing(self.next_token)));
                }
                (_, None) => {}
            }
            return;
        }
        self.issue(RefreshScope::Rooms(known), reply);
    }

    /// Issue a refetch, superseding whatever is in flight.
    ///
    /// Nothing is applied while notifications keep arriving faster than a
    /// round trip; the scope keeps widening and lands once they pause.
    fn issue(&mut self, scope: RefreshScope, reply: Option<Reply>) {
        let mut scope = scope;
        let mut waiters: Vec<Reply> = reply.into_iter().collect();
        if let Some(previous) = self.in_flight.take() {
            log::debug!(
                "Refetch {} superseded before completing; carrying {:?} and {} waiter(s) forward",
                previous.token,
                previous.scope,
                previous.waiters.len()
            );
            scope = scope.merge(previous.scope);
            waiters.extend(previous.waiters);
        }

        self.next_token += 1;
        let token = self.next_token;
        log::debug!("Refetch {} issued for {:?}", token, scope);
        self.spawn_fetch(token, &scope);
        self.in_flight = Some(InFlight {
            token,
            scope,
            waiters,
        });
        self.publish_state();
    }

    fn room_link(&self, id: RoomId) -> Result<Link, String> {
        if let Some(room) = self.mirror.get(id) {
            if room.has_link("self") {
                return Ok(room.link("self"));
            }
        }
        let manifest = self.session.manifest();
        if !manifest.exists(ROOM_REL) {
            return Err(format!("room {} has no self link", id));
        }
        manifest
            .resolve(ROOM_REL)
            .fill(&TemplateParams::new().with("id", id))
            .map_err(|e| e.to_string())
    }

    fn spawn_fetch(&self, token: u64, scope: &RefreshScope) {
        let client = self.client.clone();
        let alive = Arc::clone(&self.alive);
        let tx = self.commands_tx.clone();

        match scope {
            RefreshScope::Rooms(ids) => {
                let targets: Vec<(RoomId, Result<Link, String>)> =
                    ids.iter().map(|&id| (id, self.room_link(id))).collect();
                tokio::spawn(async move {
                    let fetches = targets
                        .into_iter()
                        .map(|(id, link)| fetch_room(&client, id, link));
                    let results = join_all(fetches).await;
                    if alive.load(Ordering::SeqCst) {
                        let _ = tx.send(Command::FetchDone {
                            token,
                            result: FetchResult::Rooms(results),
                        });
                    }
                });
            }
            RefreshScope::Full => {
                let link = self.mirror.link("self");
                tokio::spawn(async move {
                    let result = if link.is_empty() {
                        Err("location has no self link".to_string())
                    } else {
                        client
                            .invoke::<Building>(&link)
                            .await
                            .map_err(|e| e.to_string())
                    };
                    if alive.load(Ordering::SeqCst) {
                        let _ = tx.send(Command::FetchDone {
                            token,
                            result: FetchResult::Location(result),
                        });
                    }
                });
            }
        }
    }

    fn on_fetch_done(&mut self, token: u64, result: FetchResult) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let flight = match self.in_flight.take() {
            Some(flight) if flight.token == token => flight,
            other => {
                self.in_flight = other;
                log::debug!(
                    "Discarding response {} superseded by {}",
                    token,
                    self.next_token
                );
                let _ = self.events_tx.send(ReconcileEvent::Superseded {
                    token,
                    by: self.next_token,
                });
                return;
            }
        };

        let outcome = self.apply(flight.token, flight.scope, result);
        for waiter in flight.waiters {
            let _ = waiter.send(Ok(outcome.clone()));
        }
        let _ = self.events_tx.send(ReconcileEvent::Refreshed(outcome));
        self.publish_state();
    }

    fn apply(&self, token: u64, scope: RefreshScope, result: FetchResult) -> RefreshOutcome {
        let mut updated = Vec::new();
        let mut changed = Vec::new();
        let mut failed = Vec::new();

        match result {
            FetchResult::Rooms(results) => {
                let mut rooms = Vec::with_capacity(results.len());
                for result in results {
                    match result {
                        Ok(room) => {
                            updated.push(room.room_id);
                            rooms.push(room);
                        }
                        Err(failure) => {
                            log::warn!("Refetch {}: {:?}", token, failure);
                            failed.push(failure);
                        }
                    }
                }
                changed = self.mirror.apply_point_updates(rooms);
            }
            FetchResult::Location(Ok(building)) => {
                self.mirror.load_full(building);
                updated = self.mirror.room_ids();
                changed = updated.clone();
            }
            FetchResult::Location(Err(message)) => {
                log::warn!("Reload {} failed: {}", token, message);
                failed.push(FetchFailure::Location { message });
            }
        }

        RefreshOutcome {
            token,
            scope,
            updated,
            changed,
            failed,
            completed_at: Utc::now(),
        }
    }

    fn publish_state(&self) {
        let state = match self.link {
            LinkState::Connecting => ChannelState::Connecting,
            LinkState::Disconnected => ChannelState::Disconnected,
            LinkState::Connected { .. } if self.in_flight.is_some() => ChannelState::Refetching,
            LinkState::Connected { .. } => ChannelState::Connected,
        };
        let modified = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if modified {
            log::debug!("Channel state: {}", state);
            let _ = self.events_tx.send(ReconcileEvent::StateChanged(state));
        }
    }
}

async fn fetch_room(
    client: &HypermediaClient,
    room_id: RoomId,
    link: Result<Link, String>,
) -> Result<Room, FetchFailure> {
    let link = link.map_err(|message| FetchFailure::Room { room_id, message })?;
    match client.invoke::<Room>(&link).await {
        Ok(room) if room.room_id == room_id => Ok(room),
        Ok(room) => Err(FetchFailure::Room {
            room_id,
            message: format!("server answered with room {}", room.room_id),
        }),
        Err(e) => Err(FetchFailure::Room {
            room_id,
            message: e.to_string(),
        }),
    }
}

struct ConnectionTask {
    group: GroupKey,
    session: Arc<Session>,
    transport: Arc<dyn PushTransport>,
    alive: Arc<AtomicBool>,
    commands_tx: mpsc::UnboundedSender<Command>,
    backoff: Duration,
}

impl ConnectionTask {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut joined_before = false;

        while self.alive.load(Ordering::SeqCst) {
            self.report(LinkState::Connecting);
            let opened = tokio::select! {
                _ = shutdown_rx.recv() => break,
                opened = self.open() => opened,
            };

            match opened {
                Ok(conn) => {
                    log::info!("Joined push group {}", self.group);
                    self.report(LinkState::Connected {
                        rejoined: joined_before,
                    });
                    joined_before = true;

                    let torn_down = self.listen(conn.as_ref(), &mut shutdown_rx).await;
                    conn.close().await;
                    if torn_down {
                        break;
                    }
                }
                Err(e) => log::warn!("Push connection for {} failed: {}", self.group, e),
            }

            self.report(LinkState::Disconnected);
            if !self.alive.load(Ordering::SeqCst) {
                break;
            }
            log::info!("Reconnecting to {} in {:?}", self.group, self.backoff);
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
        log::debug!("Connection task for {} stopped", self.group);
    }

    async fn open(&self) -> Result<Box<dyn PushConnection>, PushError> {
        let manifest = self.session.manifest();
        if !manifest.exists(PUSH_ENDPOINT_REL) {
            return Err(PushError::ConnectionError(format!(
                "manifest has no '{}' relation",
                PUSH_ENDPOINT_REL
            )));
        }
        let conn = self
            .transport
            .connect(&manifest.resolve(PUSH_ENDPOINT_REL))
            .await?;
        if let Err(e) = conn.join(&self.group).await {
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }

    /// Forward notifications until the connection drops (`false`) or the
    /// channel is torn down (`true`).
    async fn listen(
        &self,
        conn: &dyn PushConnection,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return true,
                message = conn.recv() => match message {
                    Ok(PushMessage::Updated(ids)) => {
                        log::debug!("{} updated: {:?}", self.group, ids);
                        if self.commands_tx.send(Command::Refresh { ids, reply: None }).is_err() {
                            return true;
                        }
                    }
                    Err(e) => {
                        log::info!("Push connection for {} closed: {}", self.group, e);
                        return false;
                    }
                },
            }
        }
    }

    fn report(&self, link: LinkState) {
        if self.alive.load(Ordering::SeqCst) {
            let _ = self.commands_tx.send(Command::Link(link));
        }
    }
}
