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

mod common;

use std::time::Duration;

use common::*;
use mqtt_broker_core::packet::{ConnectPacket, ConnectReasonCode, Packet, ProtocolVersion};
use mqtt_broker_core::{BrokerEvent, BrokerOptions, DisconnectType};

#[tokio::test]
async fn test_connect_connack_disconnect() {
    let broker = start_broker(BrokerOptions::default());
    let mut events = broker.subscribe_events();

    let (adapter, handle) = connect_client(&broker, "test_client", true).await;
    assert_eq!(broker.get_client_status().await.len(), 1);

    adapter.client_send(Packet::Disconnect);
    join_client(handle).await;

    assert!(adapter.is_disconnected());
    assert!(broker.get_client_status().await.is_empty());
    let event = wait_for_event(&mut events, |event| {
        matches!(event, BrokerEvent::ClientDisconnected { .. })
    })
    .await;
    match event {
        BrokerEvent::ClientDisconnected {
            client_id,
            disconnect_type,
        } => {
            assert_eq!(client_id, "test_client");
            assert_eq!(disconnect_type, DisconnectType::Clean);
        }
        other => panic!("Unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_first_packet_must_be_connect() {
    let broker = start_broker(BrokerOptions::default());

    let adapter = MockChannelAdapter::new("mock://rogue", ProtocolVersion::V5_0);
    adapter.client_send(Packet::Pingreq);
    let handle = attach_client(&broker, &adapter);

    join_client(handle).await;

    // Quiet close: no CONNACK, nothing registered
    assert!(adapter.try_next_sent(Duration::from_millis(100)).await.is_none());
    assert!(adapter.is_disconnected());
    assert!(broker.get_client_status().await.is_empty());
    assert!(broker.get_session_status().await.is_empty());
}

#[tokio::test]
async fn test_missing_connect_times_out() {
    let options =
        BrokerOptions::default().with_communication_timeout(Duration::from_millis(100));
    let broker = start_broker(options);

    let adapter = MockChannelAdapter::new("mock://silent", ProtocolVersion::V5_0);
    let handle = attach_client(&broker, &adapter);

    join_client(handle).await;

    assert!(adapter.is_disconnected());
    assert!(broker.get_client_status().await.is_empty());
}

#[tokio::test]
async fn test_channel_closed_before_connect() {
    let broker = start_broker(BrokerOptions::default());

    let adapter = MockChannelAdapter::new("mock://gone", ProtocolVersion::V5_0);
    adapter.close_channel();
    let handle = attach_client(&broker, &adapter);

    join_client(handle).await;
    assert!(broker.get_client_status().await.is_empty());
}

#[tokio::test]
async fn test_empty_client_id_v3_rejected() {
    let broker = start_broker(BrokerOptions::default());

    let adapter = MockChannelAdapter::new("mock://anon", ProtocolVersion::V3_1_1);
    adapter.client_send(Packet::Connect(ConnectPacket {
        client_id: String::new(),
        clean_session: true,
        user_name: None,
        password: None,
        keep_alive: 60,
        will_message: None,
    }));
    let handle = attach_client(&broker, &adapter);

    let connack = expect_connack(&adapter).await;
    assert_eq!(
        connack.reason_code,
        ConnectReasonCode::ClientIdentifierNotValid
    );

    join_client(handle).await;
    assert!(broker.get_session_status().await.is_empty());
}

#[tokio::test]
async fn test_pingreq_gets_pingresp() {
    let broker = start_broker(BrokerOptions::default());

    let (adapter, handle) = connect_client(&broker, "pinger", true).await;
    adapter.client_send(Packet::Pingreq);
    match adapter.next_sent().await {
        Packet::Pingresp => {}
        other => panic!("Expected PINGRESP, got {other:?}"),
    }

    adapter.client_send(Packet::Disconnect);
    join_client(handle).await;
}

#[tokio::test]
async fn test_broker_stop_disconnects_clients() {
    let broker = start_broker(BrokerOptions::default());

    let (adapter_a, handle_a) = connect_client(&broker, "stop_a", true).await;
    let (adapter_b, handle_b) = connect_client(&broker, "stop_b", true).await;

    broker.stop().await;

    join_client(handle_a).await;
    join_client(handle_b).await;
    assert!(adapter_a.is_disconnected());
    assert!(adapter_b.is_disconnected());
    assert!(broker.get_client_status().await.is_empty());
}
