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

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::hooks::ConnectionValidatorContext;
use crate::packet::{ConnackPacket, Packet, ProtocolVersion};

/// Failures surfaced by a channel adapter.
///
/// `Timeout` and `Cancelled` are distinct on purpose: a communication
/// timeout is a peer problem, cancellation is broker shutdown and is
/// swallowed silently at the outer frames.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("communication timeout after {0:?}")]
    Timeout(Duration),
    #[error("channel closed")]
    Closed,
    #[error("operation cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled)
    }
}

/// The framed packet channel the core consumes.
///
/// Implementations own the wire codec and the transport. All async
/// operations must be cancel safe: the connection loop races
/// `receive_packet` against outbound work and drops the losing future.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Remote endpoint, used as the log key before a client id is known.
    fn endpoint(&self) -> String;

    /// Protocol version negotiated by the codec.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Receive the next packet. `Ok(None)` means the peer closed the
    /// channel in an orderly way.
    async fn receive_packet(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Packet>, ChannelError>;

    async fn send_packet(
        &self,
        packet: Packet,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError>;

    /// Close the channel. Safe to call more than once.
    async fn disconnect(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError>;

    /// Format a CONNACK for this channel's protocol version from the
    /// outcome of connect validation.
    fn create_connack(
        &self,
        context: &ConnectionValidatorContext,
        session_present: bool,
    ) -> ConnackPacket;
}
