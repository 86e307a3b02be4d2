// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, trace};

use crate::error::BrokerError;
use crate::hooks::SessionItems;
use crate::packet::{ApplicationMessage, Qos};
use crate::subscription::{self, SubscriptionSet};

/// An application message queued for delivery to one session.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: ApplicationMessage,
    /// `min(publish QoS, subscription QoS)` fixed at enqueue time.
    pub effective_qos: Qos,
    /// Set for retained handoff on subscribe; live fan-out delivers with
    /// the retain flag cleared.
    pub is_retained: bool,
}

/// Point-in-time session state for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub client_id: String,
    pub pending_application_messages: usize,
    pub subscriptions: Vec<String>,
}

/// Persistent per-client state: user items from connect validation, the
/// subscription set and the queue of not yet transmitted messages. Outlives
/// a single network attachment unless the client asked for a clean session.
pub struct Session {
    client_id: String,
    items: SessionItems,
    subscriptions: RwLock<SubscriptionSet>,
    queued: parking_lot::Mutex<VecDeque<QueuedMessage>>,
    pending: Notify,
}

impl Session {
    pub fn new(client_id: String, items: SessionItems) -> Self {
        Self {
            client_id,
            items,
            subscriptions: RwLock::new(SubscriptionSet::new()),
            queued: parking_lot::Mutex::new(VecDeque::new()),
            pending: Notify::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Shared handle to the session's user items. The handle identity is
    /// stable across reconnects that reuse this session.
    pub fn items(&self) -> SessionItems {
        self.items.clone()
    }

    /// Add or update subscriptions; returns the granted QoS per filter.
    /// All filters are validated before any of them is applied.
    pub async fn subscribe(&self, filters: &[(String, Qos)]) -> Result<Vec<Qos>, BrokerError> {
        for (filter, _) in filters {
            subscription::validate_topic_filter(filter)?;
        }

        let mut subscriptions = self.subscriptions.write().await;
        let granted = filters
            .iter()
            .map(|(filter, qos)| subscriptions.insert(filter, *qos))
            .collect();

        trace!(
            "Session '{}' subscribed to {:?}, total filters: {}",
            self.client_id,
            filters,
            subscriptions.len()
        );
        Ok(granted)
    }

    pub async fn unsubscribe(&self, filters: &[String]) {
        let mut subscriptions = self.subscriptions.write().await;
        for filter in filters {
            if subscriptions.remove(filter) {
                trace!("Session '{}' unsubscribed from '{filter}'", self.client_id);
            }
        }
    }

    /// Offer a dispatched message to this session. Returns whether the
    /// session is subscribed to the topic. The granted QoS of the matching
    /// filter arbitrates the delivery QoS.
    pub async fn enqueue(
        &self,
        message: &ApplicationMessage,
        sender_client_id: Option<&str>,
        is_retained: bool,
    ) -> bool {
        let subscription_qos = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions.matching_qos(&message.topic)
        };
        let Some(subscription_qos) = subscription_qos else {
            return false;
        };

        let effective_qos = message.qos.min(subscription_qos);
        self.queued.lock().push_back(QueuedMessage {
            message: message.clone(),
            effective_qos,
            is_retained,
        });
        self.pending.notify_one();

        trace!(
            "Queued message on '{}' for session '{}' (sender: {sender_client_id:?}, retained: {is_retained})",
            message.topic,
            self.client_id
        );
        true
    }

    /// Next queued message; suspends until one is available. Single
    /// consumer: the session's live connection.
    pub async fn next_queued(&self) -> QueuedMessage {
        loop {
            if let Some(queued) = self.queued.lock().pop_front() {
                return queued;
            }
            self.pending.notified().await;
        }
    }

    pub async fn fill_status(&self) -> SessionStatus {
        let subscriptions = self.subscriptions.read().await;
        SessionStatus {
            client_id: self.client_id.clone(),
            pending_application_messages: self.queued.lock().len(),
            subscriptions: subscriptions.topic_filters(),
        }
    }
}

/// Session registry: at most one session per client id.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically return the existing session or install a fresh one from
    /// `factory`. The bool is true when the session already existed.
    pub async fn get_or_install(
        &self,
        client_id: &str,
        factory: impl FnOnce() -> Session,
    ) -> (Arc<Session>, bool) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(client_id) {
            debug!("Reusing existing session for '{client_id}'");
            (session.clone(), true)
        } else {
            debug!("Creating new session for '{client_id}'");
            let session = Arc::new(factory());
            sessions.insert(client_id.to_string(), session.clone());
            (session, false)
        }
    }

    /// Install `session`, discarding any prior entry (the clean-session
    /// branch of takeover). Returns the new entry and the replaced one.
    pub async fn replace(
        &self,
        client_id: &str,
        session: Session,
    ) -> (Arc<Session>, Option<Arc<Session>>) {
        let mut sessions = self.sessions.write().await;
        let session = Arc::new(session);
        let previous = sessions.insert(client_id.to_string(), session.clone());
        if previous.is_some() {
            debug!("Replaced session for '{client_id}' (clean session)");
        }
        (session, previous)
    }

    pub async fn get(&self, client_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(client_id).cloned()
    }

    pub async fn try_remove(&self, client_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(client_id)
    }

    /// Point-in-time enumeration for the fan-out step. Insertions and
    /// removals after the snapshot is taken are not reflected in it.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
