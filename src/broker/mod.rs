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

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelAdapter, ChannelError};
use crate::connection_store::{Connection, ConnectionStore};
use crate::hooks::{
    new_session_items, BrokerEvent, ConnectionValidatorContext, DisconnectType, SessionItems,
};
use crate::options::BrokerOptions;
use crate::packet::{ConnectReasonCode, Packet, ProtocolVersion};
use crate::retained_store::RetainedStore;
use crate::session_store::{Session, SessionStore};

mod admin_impl;
mod dispatch_impl;

use dispatch_impl::EnqueuedApplicationMessage;

/// Coordinates client connections and sessions: connect handshake, client id
/// takeover, the application message dispatch loop and cleanup. Cheap to
/// clone; clones share all state.
#[derive(Clone)]
pub struct BrokerManager {
    options: BrokerOptions,

    /// Session registry (one session per client id)
    sessions: Arc<SessionStore>,

    /// Connection registry (one live connection per client id)
    connections: Arc<ConnectionStore>,

    /// Global retained message store
    retained: Arc<RetainedStore>,

    /// Items handed to interceptors for broker-originated messages
    server_session_items: SessionItems,

    /// Serialises session/connection reconciliation during connects.
    /// Held only while the registries are updated, never across channel I/O
    /// or while stopping an evicted connection.
    create_connection_gate: Arc<Mutex<()>>,

    dispatch_tx: mpsc::UnboundedSender<EnqueuedApplicationMessage>,
    dispatch_rx: Arc<parking_lot::Mutex<Option<mpsc::UnboundedReceiver<EnqueuedApplicationMessage>>>>,
    dispatch_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,

    events: broadcast::Sender<BrokerEvent>,
    cancel: CancellationToken,
}

impl BrokerManager {
    /// Create a new broker manager. `cancel` is the broker-wide shutdown
    /// token; cancelling it terminates the dispatch loop and every
    /// connection at its next suspension point.
    pub fn new(options: BrokerOptions, cancel: CancellationToken) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        Self {
            options,
            sessions: Arc::new(SessionStore::new()),
            connections: Arc::new(ConnectionStore::new()),
            retained: Arc::new(RetainedStore::new()),
            server_session_items: new_session_items(),
            create_connection_gate: Arc::new(Mutex::new(())),
            dispatch_tx,
            dispatch_rx: Arc::new(parking_lot::Mutex::new(Some(dispatch_rx))),
            dispatch_task: Arc::new(parking_lot::Mutex::new(None)),
            events,
            cancel,
        }
    }

    /// Start the dispatch loop. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let receiver = self.dispatch_rx.lock().take();
        let Some(receiver) = receiver else {
            warn!("Broker '{}' already started", self.options.client_id);
            return;
        };

        let broker = self.clone();
        let task = tokio::spawn(async move {
            broker.dispatch_loop(receiver).await;
        });
        *self.dispatch_task.lock() = Some(task);

        info!("Broker '{}' started", self.options.client_id);
    }

    /// Stop the broker: cancel the shutdown token, stop every live
    /// connection and wait for the dispatch loop to finish.
    pub async fn stop(&self) {
        info!("Stopping broker '{}'", self.options.client_id);
        self.cancel.cancel();

        for connection in self.connections.snapshot().await {
            connection.stop(false).await;
        }

        let task = self.dispatch_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Receiver for broker lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    /// Handle a new client attachment to completion: read and validate the
    /// CONNECT, install the session and connection, run the connection, and
    /// clean up whatever happened. Every fault is handled here; callers
    /// typically spawn one task per attachment around this call.
    pub async fn handle_client_connection(&self, adapter: Arc<dyn ChannelAdapter>) {
        let mut connection: Option<Arc<Connection>> = None;

        match self.run_client_connection(&adapter, &mut connection).await {
            Ok(()) => {}
            Err(e) if is_cancellation(&e) => {}
            Err(e) => {
                error!(
                    "Unhandled error on client connection from {}: {e}",
                    adapter.endpoint()
                );
            }
        }

        let (client_id, disconnect_type) = match &connection {
            Some(connection) => (
                Some(connection.client_id().to_string()),
                connection.disconnect_type(),
            ),
            None => (None, DisconnectType::NotClean),
        };

        // The will belongs to the ending connection; a clean DISCONNECT
        // discards it
        if disconnect_type != DisconnectType::Clean {
            if let Some(connection) = &connection {
                if let Some(will) = connection.take_will() {
                    debug!(
                        "Publishing will of client '{}' on '{}'",
                        connection.client_id(),
                        will.topic
                    );
                    self.dispatch_application_message(will, Some(connection));
                }
            }
        }

        self.clean_up_client(client_id.as_deref(), &adapter, disconnect_type)
            .await;
    }

    async fn run_client_connection(
        &self,
        adapter: &Arc<dyn ChannelAdapter>,
        connection_out: &mut Option<Arc<Connection>>,
    ) -> anyhow::Result<()> {
        let timeout = self.options.default_communication_timeout;

        let first_packet = match adapter.receive_packet(timeout, &self.cancel).await {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                warn!("Channel from {} closed before CONNECT", adapter.endpoint());
                return Ok(());
            }
            Err(ChannelError::Timeout(_)) => {
                warn!(
                    "Timed out waiting for CONNECT from {}",
                    adapter.endpoint()
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let connect = match first_packet {
            Packet::Connect(connect) => connect,
            other => {
                warn!(
                    "[MQTT-3.1.0-1] First packet from {} was {}, expected CONNECT",
                    adapter.endpoint(),
                    other.packet_type()
                );
                return Ok(());
            }
        };

        let mut context = ConnectionValidatorContext::new(
            connect,
            adapter.endpoint(),
            adapter.protocol_version(),
        );
        if let Some(validator) = &self.options.connection_validator {
            validator.validate(&mut context).await?;
        }

        let mut client_id = context.connect().client_id.clone();
        if client_id.is_empty() && context.protocol_version() == ProtocolVersion::V5_0 {
            if let Some(assigned) = &context.assigned_client_identifier {
                client_id = assigned.clone();
            }
        }
        if client_id.is_empty() {
            context.reason_code = ConnectReasonCode::ClientIdentifierNotValid;
        }

        if context.reason_code != ConnectReasonCode::Success {
            info!(
                "Rejecting connection from {} with reason {:?}",
                adapter.endpoint(),
                context.reason_code
            );
            let connack = adapter.create_connack(&context, false);
            adapter
                .send_packet(Packet::Connack(connack), timeout, &self.cancel)
                .await?;
            return Ok(());
        }

        let connection = self
            .install_connection(client_id, context, adapter.clone())
            .await;
        *connection_out = Some(connection.clone());

        let _ = self.events.send(BrokerEvent::ClientConnected {
            client_id: connection.client_id().to_string(),
            endpoint: connection.endpoint().to_string(),
        });

        info!(
            "Client '{}' connected from {}",
            connection.client_id(),
            connection.endpoint()
        );

        connection.run(self).await?;
        Ok(())
    }

    /// Reconcile the session and connection registries for a validated
    /// connect, evicting any prior connection with the same client id.
    /// Registry updates happen under the connection gate; stopping the
    /// evicted connection happens after it is released so unrelated client
    /// ids are not blocked behind a slow eviction.
    async fn install_connection(
        &self,
        client_id: String,
        context: ConnectionValidatorContext,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Arc<Connection> {
        let (connection, existing_connection) = {
            let _gate = self.create_connection_gate.lock().await;

            let clean_session = context.connect().clean_session;
            let (session, session_present) = if clean_session {
                let (session, _previous) = self
                    .sessions
                    .replace(
                        &client_id,
                        Session::new(client_id.clone(), context.session_items.clone()),
                    )
                    .await;
                (session, false)
            } else {
                // A reused session keeps its own items; the validator's
                // items from this handshake are dropped
                self.sessions
                    .get_or_install(&client_id, || {
                        Session::new(client_id.clone(), context.session_items.clone())
                    })
                    .await
            };

            let connack = adapter.create_connack(&context, session_present);
            let connection = Arc::new(Connection::new(
                client_id.clone(),
                adapter,
                session,
                connack,
                context.connect().will_message.clone(),
                context.connect().keep_alive,
                self.options.default_communication_timeout,
                self.cancel.child_token(),
            ));

            let existing_connection = self
                .connections
                .insert_or_replace(&client_id, connection.clone())
                .await;

            (connection, existing_connection)
        };

        if let Some(existing) = existing_connection {
            debug!("Taking over existing connection for client '{client_id}'");
            existing.stop(true).await;
        }

        connection
    }

    /// Remove the connection (and, without persistent sessions, the
    /// session) for a finished client, close its channel and notify.
    /// For a takeover the registries already hold the replacing connection
    /// and the preserved session, so they are left alone.
    pub async fn clean_up_client(
        &self,
        client_id: Option<&str>,
        adapter: &Arc<dyn ChannelAdapter>,
        disconnect_type: DisconnectType,
    ) {
        if let Some(client_id) = client_id {
            if disconnect_type != DisconnectType::Takeover {
                self.connections.try_remove(client_id).await;
                if !self.options.enable_persistent_sessions
                    && self.sessions.try_remove(client_id).await.is_some()
                {
                    debug!("Deleted session of client '{client_id}'");
                }
            }
        }

        self.safe_cleanup_channel(adapter).await;

        if let Some(client_id) = client_id {
            let _ = self.events.send(BrokerEvent::ClientDisconnected {
                client_id: client_id.to_string(),
                disconnect_type,
            });
            info!("Client '{client_id}' disconnected ({disconnect_type:?})");
        }
    }

    async fn safe_cleanup_channel(&self, adapter: &Arc<dyn ChannelAdapter>) {
        let timeout = self.options.default_communication_timeout;
        if let Err(e) = adapter.disconnect(timeout, &self.cancel).await {
            if !e.is_cancelled() {
                debug!(
                    "Error while disconnecting channel {}: {e}",
                    adapter.endpoint()
                );
            }
        }
    }

    /// Stop any live connection for `client_id` and remove its session.
    /// Missing entries are not an error.
    pub async fn delete_session(&self, client_id: &str) {
        if let Some(connection) = self.connections.get(client_id).await {
            connection.stop(false).await;
        }
        if self.sessions.try_remove(client_id).await.is_some() {
            debug!("Session of client '{client_id}' deleted");
        }
    }
}

/// Cancellation is swallowed at the handshake and dispatch frames; every
/// other fault is logged there.
fn is_cancellation(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ChannelError>(),
        Some(ChannelError::Cancelled)
    )
}
