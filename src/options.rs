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
use std::time::Duration;

use uuid::Uuid;

use crate::hooks::{
    ApplicationMessageInterceptor, ConnectionValidator, UndeliveredMessageInterceptor,
};

/// Broker behaviour switches and pluggable policy.
#[derive(Clone)]
pub struct BrokerOptions {
    /// Deadline for packet read, send and channel disconnect.
    pub default_communication_timeout: Duration,
    /// When false, a session is deleted on any non-takeover disconnect.
    pub enable_persistent_sessions: bool,
    /// Sender identity used for broker-originated messages.
    pub client_id: String,
    pub connection_validator: Option<Arc<dyn ConnectionValidator>>,
    pub application_message_interceptor: Option<Arc<dyn ApplicationMessageInterceptor>>,
    pub undelivered_message_interceptor: Option<Arc<dyn UndeliveredMessageInterceptor>>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            default_communication_timeout: Duration::from_secs(10),
            enable_persistent_sessions: false,
            client_id: format!("broker-{}", Uuid::new_v4().simple()),
            connection_validator: None,
            application_message_interceptor: None,
            undelivered_message_interceptor: None,
        }
    }
}

impl BrokerOptions {
    pub fn with_communication_timeout(mut self, timeout: Duration) -> Self {
        self.default_communication_timeout = timeout;
        self
    }

    pub fn with_persistent_sessions(mut self, enabled: bool) -> Self {
        self.enable_persistent_sessions = enabled;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_connection_validator(mut self, validator: Arc<dyn ConnectionValidator>) -> Self {
        self.connection_validator = Some(validator);
        self
    }

    pub fn with_application_message_interceptor(
        mut self,
        interceptor: Arc<dyn ApplicationMessageInterceptor>,
    ) -> Self {
        self.application_message_interceptor = Some(interceptor);
        self
    }

    pub fn with_undelivered_message_interceptor(
        mut self,
        interceptor: Arc<dyn UndeliveredMessageInterceptor>,
    ) -> Self {
        self.undelivered_message_interceptor = Some(interceptor);
        self
    }
}
