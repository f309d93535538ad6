//! In-process server and push hub
//!
//! `SimServer` answers HTTP requests from a route table and records every
//! request it sees. `SimPushHub` hands out push connections and delivers
//! published notifications to the groups they joined. Response delays use
//! tokio time, so paused clocks advance instantly in tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::directory::{Link, Method};
use super::push::{GroupKey, PushConnection, PushMessage, PushTransport};
use super::{HttpError, HttpRequest, HttpTransport, PushError};
use crate::types::RoomId;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A canned response.
#[derive(Debug, Clone)]
pub struct SimResponse {
    pub result: Result<serde_json::Value, HttpError>,
    /// Time the server takes before answering.
    pub delay: Duration,
}

impl SimResponse {
    pub fn ok(value: serde_json::Value) -> Self {
        Self {
            result: Ok(value),
            delay: Duration::ZERO,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            result: Err(HttpError::Status {
                status,
                message: message.into(),
            }),
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type RouteKey = (Method, String);

/// Simulated server of record.
///
/// Queued responses are consumed first-in first-out before the sticky
/// route for the same verb and href is used. Unknown routes answer 404.
#[derive(Default)]
pub struct SimServer {
    routes: Mutex<HashMap<RouteKey, SimResponse>>,
    queued: Mutex<HashMap<RouteKey, VecDeque<SimResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl SimServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every `method href` request with `value`.
    pub fn route(&self, method: Method, href: impl Into<String>, value: serde_json::Value) {
        self.respond(method, href, SimResponse::ok(value));
    }

    /// Answer every `method href` request with an error status.
    pub fn route_error(
        &self,
        method: Method,
        href: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) {
        self.respond(method, href, SimResponse::error(status, message));
    }

    /// Install a sticky response.
    pub fn respond(&self, method: Method, href: impl Into<String>, response: SimResponse) {
        lock(&self.routes).insert((method, href.into()), response);
    }

    /// Queue a one-shot response ahead of the sticky route.
    pub fn enqueue(&self, method: Method, href: impl Into<String>, response: SimResponse) {
        lock(&self.queued)
            .entry((method, href.into()))
            .or_default()
            .push_back(response);
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests received for `method href`.
    pub fn request_count(&self, method: Method, href: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.method == method && r.href == href)
            .count()
    }

    fn next_response(&self, key: &RouteKey) -> Option<SimResponse> {
        if let Some(queue) = lock(&self.queued).get_mut(key) {
            if let Some(response) = queue.pop_front() {
                return Some(response);
            }
        }
        lock(&self.routes).get(key).cloned()
    }
}

#[async_trait]
impl HttpTransport for SimServer {
    async fn execute(&self, request: HttpRequest) -> Result<serde_json::Value, HttpError> {
        let key = (request.method, request.href.clone());
        lock(&self.requests).push(request);

        let response = self.next_response(&key).unwrap_or_else(|| {
            SimResponse::error(404, format!("No route for {} {}", key.0, key.1))
        });
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        response.result
    }
}

struct Subscriber {
    groups: Arc<Mutex<HashSet<GroupKey>>>,
    tx: mpsc::UnboundedSender<PushMessage>,
}

/// Simulated push service.
#[derive(Default)]
pub struct SimPushHub {
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
    refuse: AtomicUsize,
    connects: AtomicUsize,
}

impl SimPushHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish `updated(ids)` to `group`. Returns the number of
    /// connections it reached.
    pub fn publish(&self, group: &GroupKey, ids: Vec<RoomId>) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|_, s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.values() {
            let joined = lock(&subscriber.groups).iter().any(|g| g.receives(group));
            if joined && subscriber.tx.send(PushMessage::Updated(ids.clone())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every open connection from the server side.
    pub fn drop_all(&self) {
        lock(&self.subscribers).clear();
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Successful connection attempts so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|_, s| !s.tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl PushTransport for SimPushHub {
    async fn connect(&self, endpoint: &Link) -> Result<Box<dyn PushConnection>, PushError> {
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(PushError::ConnectionError(format!(
                "{} refused the connection",
                endpoint.href
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let groups = Arc::new(Mutex::new(HashSet::new()));
        lock(&self.subscribers).insert(
            Uuid::new_v4(),
            Subscriber {
                groups: Arc::clone(&groups),
                tx,
            },
        );
        self.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimPushConnection {
            rx: tokio::sync::Mutex::new(rx),
            groups,
            connected: AtomicBool::new(true),
        }))
    }
}

/// Client end of a simulated push connection.
pub struct SimPushConnection {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PushMessage>>,
    groups: Arc<Mutex<HashSet<GroupKey>>>,
    connected: AtomicBool,
}

#[async_trait]
impl PushConnection for SimPushConnection {
    async fn join(&self, group: &GroupKey) -> Result<(), PushError> {
        if !self.is_connected() {
            return Err(PushError::Disconnected);
        }
        lock(&self.groups).insert(group.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<PushMessage, PushError> {
        if !self.is_connected() {
            return Err(PushError::Disconnected);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(message) => Ok(message),
            None => {
                self.connected.store(false, Ordering::SeqCst);
                Err(PushError::Disconnected)
            }
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.rx.lock().await.close();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
