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

//! Client and session coordination core of an MQTT broker.
//!
//! This crate accepts client attachments through a [`channel::ChannelAdapter`],
//! validates connects with a pluggable [`hooks::ConnectionValidator`],
//! reconciles them with persistent session state (including client id
//! takeover), fans published messages out to subscribed sessions through a
//! single dispatch loop with interception hooks, and cleans up on disconnect.
//!
//! Transports, the wire codec, QoS acknowledgement flows and authorisation
//! policy live outside this crate.

pub mod broker;
pub mod channel;
pub mod connection_store;
pub mod error;
pub mod hooks;
pub mod options;
pub mod packet;
pub mod retained_store;
pub mod session_store;
pub mod subscription;
pub mod tracing_setup;

pub use broker::BrokerManager;
pub use channel::{ChannelAdapter, ChannelError};
pub use connection_store::{ClientStatus, Connection, ConnectionStore};
pub use error::{BrokerError, Result};
pub use hooks::{
    ApplicationMessageInterceptor, BrokerEvent, ConnectionValidator, ConnectionValidatorContext,
    DisconnectType, MessageInterceptionContext, SessionItems, UndeliveredMessageInterceptor,
};
pub use options::BrokerOptions;
pub use packet::{ApplicationMessage, ConnectReasonCode, Packet, ProtocolVersion, Qos};
pub use retained_store::RetainedStore;
pub use session_store::{Session, SessionStatus, SessionStore};
