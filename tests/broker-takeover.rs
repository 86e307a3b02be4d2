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
use mqtt_broker_core::packet::{ConnectReasonCode, Packet, ProtocolVersion, Qos};
use mqtt_broker_core::{BrokerEvent, BrokerOptions, DisconnectType};

#[tokio::test]
async fn test_takeover_replaces_connection_and_keeps_session() {
    let broker = start_broker(BrokerOptions::default());
    let mut events = broker.subscribe_events();

    // First attachment subscribes through its session
    let first = MockChannelAdapter::new("mock://bob-1", ProtocolVersion::V5_0);
    first.client_send(connect_packet("bob", false));
    let first_handle = attach_client(&broker, &first);
    let connack = expect_connack(&first).await;
    assert_eq!(connack.reason_code, ConnectReasonCode::Success);
    broker
        .subscribe("bob", &[("news".to_string(), Qos::AtMostOnce)])
        .await
        .expect("subscribe");

    // Second attachment with the same client id evicts the first
    let second = MockChannelAdapter::new("mock://bob-2", ProtocolVersion::V5_0);
    second.client_send(connect_packet("bob", false));
    let second_handle = attach_client(&broker, &second);
    let connack = expect_connack(&second).await;
    assert_eq!(connack.reason_code, ConnectReasonCode::Success);
    // The session survived the takeover
    assert!(connack.session_present);

    join_client(first_handle).await;
    assert!(first.is_disconnected());

    let event = wait_for_event(&mut events, |event| {
        matches!(event, BrokerEvent::ClientDisconnected { .. })
    })
    .await;
    match event {
        BrokerEvent::ClientDisconnected {
            client_id,
            disconnect_type,
        } => {
            assert_eq!(client_id, "bob");
            assert_eq!(disconnect_type, DisconnectType::Takeover);
        }
        other => panic!("Unexpected event {other:?}"),
    }

    // The registry holds only the new attachment
    let clients = broker.get_client_status().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].endpoint, "mock://bob-2");

    // The preserved subscription delivers to the new connection
    broker.dispatch_application_message(message("news", b"extra", Qos::AtMostOnce, false), None);
    let publish = expect_publish(&second).await;
    assert_eq!(publish.topic, "news");

    second.client_send(Packet::Disconnect);
    join_client(second_handle).await;
}

#[tokio::test]
async fn test_takeover_with_clean_session_resets_state() {
    let broker = start_broker(BrokerOptions::default());

    let first = MockChannelAdapter::new("mock://carol-1", ProtocolVersion::V5_0);
    first.client_send(connect_packet("carol", false));
    let first_handle = attach_client(&broker, &first);
    expect_connack(&first).await;
    broker
        .subscribe("carol", &[("news".to_string(), Qos::AtMostOnce)])
        .await
        .expect("subscribe");

    let second = MockChannelAdapter::new("mock://carol-2", ProtocolVersion::V5_0);
    second.client_send(connect_packet("carol", true));
    let second_handle = attach_client(&broker, &second);
    let connack = expect_connack(&second).await;
    assert!(!connack.session_present);

    join_client(first_handle).await;

    broker.dispatch_application_message(message("news", b"gone", Qos::AtMostOnce, false), None);
    expect_silence(&second, Duration::from_millis(200)).await;

    second.client_send(Packet::Disconnect);
    join_client(second_handle).await;
}

#[tokio::test]
async fn test_concurrent_reconnects_leave_single_registration() {
    let broker = start_broker(BrokerOptions::default());
    let mut events = broker.subscribe_events();

    let mut adapters = Vec::new();
    let mut handles = Vec::new();
    for i in 0..8 {
        let adapter =
            MockChannelAdapter::new(&format!("mock://race-{i}"), ProtocolVersion::V5_0);
        adapter.client_send(connect_packet("racer", false));
        handles.push(attach_client(&broker, &adapter));
        adapters.push(adapter);
    }

    // Seven of the eight attachments must be evicted by takeover
    for _ in 0..7 {
        wait_for_event(&mut events, |event| {
            matches!(
                event,
                BrokerEvent::ClientDisconnected {
                    disconnect_type: DisconnectType::Takeover,
                    ..
                }
            )
        })
        .await;
    }

    let clients = broker.get_client_status().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].client_id, "racer");
    assert_eq!(broker.get_session_status().await.len(), 1);

    broker.stop().await;
    for handle in handles {
        join_client(handle).await;
    }
}
