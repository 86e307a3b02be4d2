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

use bytes::Bytes;
use serde::Serialize;

/// MQTT protocol versions understood by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolVersion {
    V3_1_1,
    V5_0,
}

/// Message delivery quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// CONNACK reason codes (v5.0 names; v3.1.1 return codes map onto the
/// matching subset at the channel adapter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReasonCode {
    Success,
    UnspecifiedError,
    ClientIdentifierNotValid,
    BadUserNameOrPassword,
    NotAuthorized,
    ServerUnavailable,
    Banned,
}

/// SUBACK reason codes for the subset of outcomes this core produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubackReasonCode {
    GrantedQos0,
    GrantedQos1,
    GrantedQos2,
    UnspecifiedError,
}

impl From<Qos> for SubackReasonCode {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => SubackReasonCode::GrantedQos0,
            Qos::AtLeastOnce => SubackReasonCode::GrantedQos1,
            Qos::ExactlyOnce => SubackReasonCode::GrantedQos2,
        }
    }
}

/// An application message flowing through the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

impl ApplicationMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: Qos, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// CONNECT as seen by the core: identity, session mode and optional will.
#[derive(Debug, Clone)]
pub struct ConnectPacket {
    pub client_id: String,
    pub clean_session: bool,
    pub user_name: Option<String>,
    pub password: Option<Bytes>,
    /// Keep alive in seconds; 0 disables the receive deadline.
    pub keep_alive: u16,
    pub will_message: Option<ApplicationMessage>,
}

#[derive(Debug, Clone)]
pub struct ConnackPacket {
    pub reason_code: ConnectReasonCode,
    pub session_present: bool,
    pub assigned_client_identifier: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

impl PublishPacket {
    pub fn into_message(self) -> ApplicationMessage {
        ApplicationMessage {
            topic: self.topic,
            payload: self.payload,
            qos: self.qos,
            retain: self.retain,
        }
    }
}

impl From<ApplicationMessage> for PublishPacket {
    fn from(message: ApplicationMessage) -> Self {
        Self {
            topic: message.topic,
            payload: message.payload,
            qos: message.qos,
            retain: message.retain,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribePacket {
    pub packet_id: u16,
    /// (topic_filter, requested_qos) entries.
    pub filters: Vec<(String, Qos)>,
}

#[derive(Debug, Clone)]
pub struct SubackPacket {
    pub packet_id: u16,
    pub reason_codes: Vec<SubackReasonCode>,
}

#[derive(Debug, Clone)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UnsubackPacket {
    pub packet_id: u16,
}

/// Broker-side view of the MQTT control packets this core consumes and emits.
///
/// The wire encoding lives behind the channel adapter; this is the already
/// decoded form.
#[derive(Debug, Clone)]
pub enum Packet {
    Connect(ConnectPacket),
    Connack(ConnackPacket),
    Publish(PublishPacket),
    Subscribe(SubscribePacket),
    Suback(SubackPacket),
    Unsubscribe(UnsubscribePacket),
    Unsuback(UnsubackPacket),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Packet {
    /// Packet type name for logging.
    pub fn packet_type(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::Connack(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::Suback(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::Unsuback(_) => "UNSUBACK",
            Packet::Pingreq => "PINGREQ",
            Packet::Pingresp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}
