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

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::packet::{ApplicationMessage, ConnectPacket, ConnectReasonCode, ProtocolVersion};

/// Per-session user scratch space. Populated by the connection validator,
/// shared by reference with every hook context of that session, and kept
/// alive across reconnects that reuse the session.
pub type SessionItems = Arc<RwLock<HashMap<String, serde_json::Value>>>;

pub fn new_session_items() -> SessionItems {
    Arc::new(RwLock::new(HashMap::new()))
}

/// How a connection ended, as reported through cleanup and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectType {
    /// The peer sent DISCONNECT.
    Clean,
    /// Channel error, timeout or broker-side stop.
    NotClean,
    /// Evicted by a newer connection with the same client id.
    Takeover,
}

/// Mutable record handed to the connection validator, consumed once per
/// handshake. The validator may reject the connect via `reason_code`,
/// assign a client id for v5.0 empty-id connects, and seed `session_items`.
pub struct ConnectionValidatorContext {
    connect: ConnectPacket,
    endpoint: String,
    protocol_version: ProtocolVersion,
    pub session_items: SessionItems,
    pub assigned_client_identifier: Option<String>,
    pub reason_code: ConnectReasonCode,
}

impl ConnectionValidatorContext {
    pub(crate) fn new(
        connect: ConnectPacket,
        endpoint: String,
        protocol_version: ProtocolVersion,
    ) -> Self {
        Self {
            connect,
            endpoint,
            protocol_version,
            session_items: new_session_items(),
            assigned_client_identifier: None,
            reason_code: ConnectReasonCode::Success,
        }
    }

    pub fn connect(&self) -> &ConnectPacket {
        &self.connect
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }
}

/// Pluggable connect policy. Absent validator means accept all.
#[async_trait]
pub trait ConnectionValidator: Send + Sync {
    async fn validate(&self, context: &mut ConnectionValidatorContext) -> anyhow::Result<()>;
}

/// Context for message interception. For client publishes the sender is the
/// publishing connection and `session_items` are its session's items; for
/// broker-originated messages the sender id is the configured server client
/// id and the items are the process-wide server items.
pub struct MessageInterceptionContext {
    sender_client_id: String,
    session_items: SessionItems,
    /// The in-flight message. Setting this to `None` drops the publish.
    pub application_message: Option<ApplicationMessage>,
    /// Clearing this drops the publish without touching the connection.
    pub accept_publish: bool,
    /// Setting this stops the sender connection; dispatch of the current
    /// message continues unless `accept_publish` is also cleared.
    pub close_connection: bool,
}

impl MessageInterceptionContext {
    pub(crate) fn new(
        sender_client_id: String,
        session_items: SessionItems,
        message: ApplicationMessage,
    ) -> Self {
        Self {
            sender_client_id,
            session_items,
            application_message: Some(message),
            accept_publish: true,
            close_connection: false,
        }
    }

    pub fn sender_client_id(&self) -> &str {
        &self.sender_client_id
    }

    pub fn session_items(&self) -> &SessionItems {
        &self.session_items
    }
}

/// Observes, mutates or vetoes every application message before fan-out.
#[async_trait]
pub trait ApplicationMessageInterceptor: Send + Sync {
    async fn intercept(&self, context: &mut MessageInterceptionContext) -> anyhow::Result<()>;
}

/// Notified when an accepted message reached zero subscribed sessions.
#[async_trait]
pub trait UndeliveredMessageInterceptor: Send + Sync {
    async fn intercept(&self, context: &MessageInterceptionContext) -> anyhow::Result<()>;
}

/// Broker lifecycle notifications, delivered best effort over a broadcast
/// channel; a send with no live receivers is not an error.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    ClientConnected {
        client_id: String,
        endpoint: String,
    },
    ClientDisconnected {
        client_id: String,
        disconnect_type: DisconnectType,
    },
    ApplicationMessageReceived {
        /// `None` for broker-originated messages.
        sender_client_id: Option<String>,
        message: ApplicationMessage,
    },
}
