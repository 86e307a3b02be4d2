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

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mqtt_broker_core::channel::{ChannelAdapter, ChannelError};
use mqtt_broker_core::hooks::ConnectionValidatorContext;
use mqtt_broker_core::packet::{
    ApplicationMessage, ConnackPacket, ConnectPacket, ConnectReasonCode, Packet, ProtocolVersion,
    PublishPacket, Qos,
};
use mqtt_broker_core::{BrokerManager, BrokerOptions};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory channel adapter scripted by the test: the test plays the
/// client by pushing decoded packets in and reading sent packets out.
pub struct MockChannelAdapter {
    endpoint: String,
    protocol_version: ProtocolVersion,
    incoming_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<Packet>>,
    outgoing_tx: mpsc::UnboundedSender<Packet>,
    outgoing_rx: Mutex<mpsc::UnboundedReceiver<Packet>>,
    disconnected: AtomicBool,
}

impl MockChannelAdapter {
    pub fn new(endpoint: &str, protocol_version: ProtocolVersion) -> Arc<Self> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            protocol_version,
            incoming_tx: parking_lot::Mutex::new(Some(incoming_tx)),
            incoming_rx: Mutex::new(incoming_rx),
            outgoing_tx,
            outgoing_rx: Mutex::new(outgoing_rx),
            disconnected: AtomicBool::new(false),
        })
    }

    /// Queue a packet as if the peer had sent it.
    pub fn client_send(&self, packet: Packet) {
        if let Some(tx) = self.incoming_tx.lock().as_ref() {
            let _ = tx.send(packet);
        }
    }

    /// Close the inbound side without a DISCONNECT (abnormal peer loss).
    pub fn close_channel(&self) {
        self.incoming_tx.lock().take();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Next packet the broker sent to this peer; panics after a grace
    /// period so hangs fail fast.
    pub async fn next_sent(&self) -> Packet {
        let mut rx = self.outgoing_rx.lock().await;
        tokio::time::timeout(WAIT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a packet from the broker")
            .expect("outgoing channel closed")
    }

    /// Next sent packet within `wait`, or `None`.
    pub async fn try_next_sent(&self, wait: Duration) -> Option<Packet> {
        let mut rx = self.outgoing_rx.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }
}

#[async_trait]
impl ChannelAdapter for MockChannelAdapter {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    async fn receive_packet(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Packet>, ChannelError> {
        let mut rx = self.incoming_rx.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(ChannelError::Timeout(timeout)),
            packet = rx.recv() => Ok(packet),
        }
    }

    async fn send_packet(
        &self,
        packet: Packet,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.outgoing_tx
            .send(packet)
            .map_err(|_| ChannelError::Closed)
    }

    async fn disconnect(
        &self,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.incoming_tx.lock().take();
        Ok(())
    }

    fn create_connack(
        &self,
        context: &ConnectionValidatorContext,
        session_present: bool,
    ) -> ConnackPacket {
        ConnackPacket {
            reason_code: context.reason_code,
            session_present,
            assigned_client_identifier: context.assigned_client_identifier.clone(),
        }
    }
}

/// Broker with the dispatch loop running.
pub fn start_broker(options: BrokerOptions) -> BrokerManager {
    // First caller in the process wins the subscriber; the rest is a no-op
    let _ = mqtt_broker_core::tracing_setup::init_tracing(tracing::Level::WARN);
    let broker = BrokerManager::new(options, CancellationToken::new());
    broker.start();
    broker
}

pub fn connect_packet(client_id: &str, clean_session: bool) -> Packet {
    Packet::Connect(ConnectPacket {
        client_id: client_id.to_string(),
        clean_session,
        user_name: None,
        password: None,
        keep_alive: 60,
        will_message: None,
    })
}

pub fn publish_packet(topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Packet {
    Packet::Publish(PublishPacket {
        topic: topic.to_string(),
        payload: Bytes::copy_from_slice(payload),
        qos,
        retain,
    })
}

pub fn message(topic: &str, payload: &[u8], qos: Qos, retain: bool) -> ApplicationMessage {
    ApplicationMessage::new(topic.to_string(), Bytes::copy_from_slice(payload), qos, retain)
}

/// Spawn the attachment handler for an adapter, as a listener would.
pub fn attach_client(broker: &BrokerManager, adapter: &Arc<MockChannelAdapter>) -> JoinHandle<()> {
    let broker = broker.clone();
    let adapter = adapter.clone();
    tokio::spawn(async move {
        broker.handle_client_connection(adapter).await;
    })
}

pub async fn expect_connack(adapter: &MockChannelAdapter) -> ConnackPacket {
    match adapter.next_sent().await {
        Packet::Connack(connack) => connack,
        other => panic!("Expected CONNACK, got {other:?}"),
    }
}

pub async fn expect_publish(adapter: &MockChannelAdapter) -> PublishPacket {
    match adapter.next_sent().await {
        Packet::Publish(publish) => publish,
        other => panic!("Expected PUBLISH, got {other:?}"),
    }
}

/// Assert nothing is sent to this peer for a while.
pub async fn expect_silence(adapter: &MockChannelAdapter, wait: Duration) {
    if let Some(packet) = adapter.try_next_sent(wait).await {
        panic!("Expected no packet, got {packet:?}");
    }
}

/// Wait for the first broker event matching `matches`, dropping the rest.
pub async fn wait_for_event(
    receiver: &mut tokio::sync::broadcast::Receiver<mqtt_broker_core::BrokerEvent>,
    matches: impl Fn(&mqtt_broker_core::BrokerEvent) -> bool,
) -> mqtt_broker_core::BrokerEvent {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match receiver.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel error: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a broker event")
}

/// Join a connection task, failing the test instead of hanging.
pub async fn join_client(handle: JoinHandle<()>) {
    tokio::time::timeout(WAIT_TIMEOUT, handle)
        .await
        .expect("timed out waiting for the connection task")
        .expect("connection task panicked");
}

/// Connect a client end to end and assert a successful CONNACK.
pub async fn connect_client(
    broker: &BrokerManager,
    client_id: &str,
    clean_session: bool,
) -> (Arc<MockChannelAdapter>, JoinHandle<()>) {
    let adapter = MockChannelAdapter::new(
        &format!("mock://{client_id}"),
        ProtocolVersion::V5_0,
    );
    adapter.client_send(connect_packet(client_id, clean_session));
    let handle = attach_client(broker, &adapter);

    let connack = expect_connack(&adapter).await;
    assert_eq!(connack.reason_code, ConnectReasonCode::Success);

    (adapter, handle)
}
