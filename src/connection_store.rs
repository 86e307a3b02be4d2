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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::broker::BrokerManager;
use crate::channel::{ChannelAdapter, ChannelError};
use crate::hooks::DisconnectType;
use crate::packet::{
    ApplicationMessage, ConnackPacket, Packet, ProtocolVersion, PublishPacket, SubackPacket,
    SubackReasonCode, UnsubackPacket,
};
use crate::session_store::Session;

/// Receive deadline applied when the client disabled keep alive.
const NO_KEEP_ALIVE_RECEIVE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Point-in-time connection state for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub client_id: String,
    pub endpoint: String,
    pub protocol_version: ProtocolVersion,
}

/// A single live network attachment: binds a channel adapter to a session
/// for the duration of one transport lifetime. Never outlives its adapter.
pub struct Connection {
    client_id: String,
    endpoint: String,
    protocol_version: ProtocolVersion,
    adapter: Arc<dyn ChannelAdapter>,
    session: Arc<Session>,
    connack: ConnackPacket,
    will_message: parking_lot::Mutex<Option<ApplicationMessage>>,
    disconnect_type: parking_lot::Mutex<DisconnectType>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    communication_timeout: Duration,
    receive_timeout: Duration,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client_id: String,
        adapter: Arc<dyn ChannelAdapter>,
        session: Arc<Session>,
        connack: ConnackPacket,
        will_message: Option<ApplicationMessage>,
        keep_alive: u16,
        communication_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let endpoint = adapter.endpoint();
        let protocol_version = adapter.protocol_version();
        // MQTT allows 1.5x the keep alive before the server may drop the client
        let receive_timeout = if keep_alive == 0 {
            NO_KEEP_ALIVE_RECEIVE_TIMEOUT
        } else {
            Duration::from_secs(u64::from(keep_alive) * 3 / 2)
        };
        let (done_tx, done_rx) = watch::channel(false);

        Self {
            client_id,
            endpoint,
            protocol_version,
            adapter,
            session,
            connack,
            will_message: parking_lot::Mutex::new(will_message),
            disconnect_type: parking_lot::Mutex::new(DisconnectType::NotClean),
            cancel,
            done_tx,
            done_rx,
            communication_timeout,
            receive_timeout,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn disconnect_type(&self) -> DisconnectType {
        *self.disconnect_type.lock()
    }

    /// Take the will so a clean or already handled disconnect does not
    /// publish it.
    pub(crate) fn take_will(&self) -> Option<ApplicationMessage> {
        self.will_message.lock().take()
    }

    fn mark_clean(&self) {
        let mut disconnect_type = self.disconnect_type.lock();
        // Takeover must survive a racing DISCONNECT
        if *disconnect_type == DisconnectType::NotClean {
            *disconnect_type = DisconnectType::Clean;
        }
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            client_id: self.client_id.clone(),
            endpoint: self.endpoint.clone(),
            protocol_version: self.protocol_version,
        }
    }

    /// Stop this connection and wait until its run loop has finished.
    /// With `is_takeover` the cleanup path leaves the registries alone so
    /// the replacing connection stays installed.
    pub async fn stop(&self, is_takeover: bool) {
        if is_takeover {
            *self.disconnect_type.lock() = DisconnectType::Takeover;
        }
        self.cancel.cancel();

        let mut done = self.done_rx.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
        trace!("Connection for '{}' stopped", self.client_id);
    }

    /// Drive the connection to completion: send the CONNACK, then pump
    /// inbound packets and the session's outbound queue until the channel
    /// closes, a fault propagates or the connection is stopped.
    pub(crate) async fn run(
        self: Arc<Self>,
        broker: &BrokerManager,
    ) -> Result<(), ChannelError> {
        let result = Self::run_loop(&self, broker).await;
        let _ = self.done_tx.send(true);
        result
    }

    async fn run_loop(
        connection: &Arc<Self>,
        broker: &BrokerManager,
    ) -> Result<(), ChannelError> {
        let adapter = &connection.adapter;
        let timeout = connection.communication_timeout;

        adapter
            .send_packet(
                Packet::Connack(connection.connack.clone()),
                timeout,
                &connection.cancel,
            )
            .await?;

        trace!(
            "Starting packet loop for client '{}' ({})",
            connection.client_id,
            connection.endpoint
        );

        loop {
            tokio::select! {
                _ = connection.cancel.cancelled() => break,
                queued = connection.session.next_queued() => {
                    let publish = PublishPacket {
                        topic: queued.message.topic,
                        payload: queued.message.payload,
                        qos: queued.effective_qos,
                        retain: queued.is_retained,
                    };
                    adapter
                        .send_packet(Packet::Publish(publish), timeout, &connection.cancel)
                        .await?;
                }
                received = adapter.receive_packet(connection.receive_timeout, &connection.cancel) => {
                    match received {
                        Ok(Some(packet)) => {
                            if !Self::handle_packet(connection, broker, packet).await? {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("Channel closed by client '{}'", connection.client_id);
                            break;
                        }
                        Err(ChannelError::Timeout(_)) => {
                            warn!(
                                "Keep alive expired for client '{}' ({})",
                                connection.client_id,
                                connection.endpoint
                            );
                            break;
                        }
                        Err(ChannelError::Cancelled) => break,
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        trace!("Packet loop finished for client '{}'", connection.client_id);
        Ok(())
    }

    /// Returns false when the loop should end.
    async fn handle_packet(
        connection: &Arc<Self>,
        broker: &BrokerManager,
        packet: Packet,
    ) -> Result<bool, ChannelError> {
        let adapter = &connection.adapter;
        let timeout = connection.communication_timeout;

        match packet {
            Packet::Publish(publish) => {
                broker.dispatch_application_message(publish.into_message(), Some(connection));
            }
            Packet::Subscribe(subscribe) => {
                let reason_codes = match broker
                    .subscribe_session(&connection.session, &subscribe.filters)
                    .await
                {
                    Ok(granted) => granted.into_iter().map(SubackReasonCode::from).collect(),
                    Err(e) => {
                        debug!(
                            "SUBSCRIBE from client '{}' rejected: {e}",
                            connection.client_id
                        );
                        vec![SubackReasonCode::UnspecifiedError; subscribe.filters.len()]
                    }
                };
                let suback = SubackPacket {
                    packet_id: subscribe.packet_id,
                    reason_codes,
                };
                adapter
                    .send_packet(Packet::Suback(suback), timeout, &connection.cancel)
                    .await?;
            }
            Packet::Unsubscribe(unsubscribe) => {
                connection.session.unsubscribe(&unsubscribe.filters).await;
                let unsuback = UnsubackPacket {
                    packet_id: unsubscribe.packet_id,
                };
                adapter
                    .send_packet(Packet::Unsuback(unsuback), timeout, &connection.cancel)
                    .await?;
            }
            Packet::Pingreq => {
                adapter
                    .send_packet(Packet::Pingresp, timeout, &connection.cancel)
                    .await?;
            }
            Packet::Disconnect => {
                trace!("Received DISCONNECT from client '{}'", connection.client_id);
                connection.mark_clean();
                return Ok(false);
            }
            Packet::Connect(_) => {
                warn!(
                    "Protocol violation: second CONNECT from client '{}'",
                    connection.client_id
                );
                return Ok(false);
            }
            other => {
                trace!(
                    "Ignoring unexpected {} from client '{}'",
                    other.packet_type(),
                    connection.client_id
                );
            }
        }

        Ok(true)
    }
}

/// Connection registry: at most one live connection per client id.
pub struct ConnectionStore {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionStore {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Install `connection`, returning the displaced prior connection for
    /// the same client id, if any.
    pub async fn insert_or_replace(
        &self,
        client_id: &str,
        connection: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        connections.insert(client_id.to_string(), connection)
    }

    pub async fn get(&self, client_id: &str) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(client_id).cloned()
    }

    pub async fn try_remove(&self, client_id: &str) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        connections.remove(client_id)
    }

    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.values().cloned().collect()
    }
}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}
