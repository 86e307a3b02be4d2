// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use tracing::trace;

use super::BrokerManager;
use crate::connection_store::ClientStatus;
use crate::error::{BrokerError, Result};
use crate::packet::Qos;
use crate::session_store::{Session, SessionStatus};

impl BrokerManager {
    /// Add subscriptions for an existing session. Unknown client ids are a
    /// caller error, unlike faults inside dispatch which are logged there.
    pub async fn subscribe(&self, client_id: &str, filters: &[(String, Qos)]) -> Result<Vec<Qos>> {
        let session = self
            .sessions
            .get(client_id)
            .await
            .ok_or_else(|| BrokerError::SessionNotFound(client_id.to_string()))?;
        self.subscribe_session(&session, filters).await
    }

    /// Subscribe a session and hand it the matching retained messages.
    pub(crate) async fn subscribe_session(
        &self,
        session: &Arc<Session>,
        filters: &[(String, Qos)],
    ) -> Result<Vec<Qos>> {
        let granted = session.subscribe(filters).await?;

        for (filter, _) in filters {
            for message in self.retained.get_matching(filter).await {
                trace!(
                    "Handing retained message on '{}' to session '{}'",
                    message.topic,
                    session.client_id()
                );
                session.enqueue(&message, None, true).await;
            }
        }

        Ok(granted)
    }

    pub async fn unsubscribe(&self, client_id: &str, filters: &[String]) -> Result<()> {
        let session = self
            .sessions
            .get(client_id)
            .await
            .ok_or_else(|| BrokerError::SessionNotFound(client_id.to_string()))?;
        session.unsubscribe(filters).await;
        Ok(())
    }

    /// Status of every live connection.
    pub async fn get_client_status(&self) -> Vec<ClientStatus> {
        let mut statuses: Vec<ClientStatus> = self
            .connections
            .snapshot()
            .await
            .iter()
            .map(|connection| connection.status())
            .collect();
        statuses.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        statuses
    }

    /// Status of every known session, live or detached.
    pub async fn get_session_status(&self) -> Vec<SessionStatus> {
        let mut statuses = Vec::new();
        for session in self.sessions.snapshot().await {
            statuses.push(session.fill_status().await);
        }
        statuses.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        statuses
    }
}
