// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// SPDX-License-Identifier: MIT

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::{is_cancellation, BrokerManager};
use crate::connection_store::Connection;
use crate::hooks::{BrokerEvent, MessageInterceptionContext, SessionItems};
use crate::packet::ApplicationMessage;

/// An application message waiting in the dispatch queue. The sender is held
/// weakly: a dispatch cycle tolerates a sender that disconnected between
/// enqueue and dequeue.
pub(super) struct EnqueuedApplicationMessage {
    pub message: ApplicationMessage,
    pub sender: Option<Weak<Connection>>,
}

impl BrokerManager {
    /// Enqueue an application message for dispatch. Non-blocking; `sender`
    /// is `None` for broker-originated messages.
    pub fn dispatch_application_message(
        &self,
        message: ApplicationMessage,
        sender: Option<&Arc<Connection>>,
    ) {
        let enqueued = EnqueuedApplicationMessage {
            message,
            sender: sender.map(Arc::downgrade),
        };
        if self.dispatch_tx.send(enqueued).is_err() {
            trace!("Dispatch queue closed, dropping application message");
        }
    }

    /// Single consumer of the dispatch queue. Runs until the broker token
    /// is cancelled; one bad message must not stop the loop.
    pub(super) async fn dispatch_loop(
        &self,
        mut receiver: mpsc::UnboundedReceiver<EnqueuedApplicationMessage>,
    ) {
        debug!("Application message dispatch loop started");

        loop {
            let enqueued = tokio::select! {
                _ = self.cancel.cancelled() => break,
                enqueued = receiver.recv() => match enqueued {
                    Some(enqueued) => enqueued,
                    None => break,
                },
            };

            if let Err(e) = self.process_enqueued_message(enqueued).await {
                if is_cancellation(&e) {
                    break;
                }
                error!("Error while dispatching application message: {e}");
            }
        }

        debug!("Application message dispatch loop finished");
    }

    async fn process_enqueued_message(
        &self,
        enqueued: EnqueuedApplicationMessage,
    ) -> anyhow::Result<()> {
        let sender = enqueued.sender.as_ref().and_then(Weak::upgrade);
        let mut message = enqueued.message;

        if let Some(interceptor) = &self.options.application_message_interceptor {
            let (sender_client_id, session_items) = self.sender_identity(&sender);
            let mut context =
                MessageInterceptionContext::new(sender_client_id, session_items, message);
            interceptor.intercept(&mut context).await?;

            if context.close_connection {
                if let Some(sender) = sender.clone() {
                    debug!(
                        "Interceptor requested closing connection of '{}'",
                        sender.client_id()
                    );
                    tokio::spawn(async move {
                        sender.stop(false).await;
                    });
                }
            }

            match (context.application_message, context.accept_publish) {
                (Some(replaced), true) => message = replaced,
                _ => {
                    trace!("Application message dropped by interceptor");
                    return Ok(());
                }
            }
        }

        let sender_client_id = sender.as_ref().map(|s| s.client_id().to_string());

        let _ = self.events.send(BrokerEvent::ApplicationMessageReceived {
            sender_client_id: sender_client_id.clone(),
            message: message.clone(),
        });

        if message.retain {
            self.retained
                .update(sender_client_id.as_deref(), &message)
                .await;
        }

        let mut subscribed_count = 0usize;
        for session in self.sessions.snapshot().await {
            if session
                .enqueue(&message, sender_client_id.as_deref(), false)
                .await
            {
                subscribed_count += 1;
            }
        }

        trace!(
            "Dispatched message on '{}' to {subscribed_count} subscribed session(s)",
            message.topic
        );

        if subscribed_count == 0 {
            if let Some(interceptor) = &self.options.undelivered_message_interceptor {
                let (sender_client_id, session_items) = self.sender_identity(&sender);
                let context =
                    MessageInterceptionContext::new(sender_client_id, session_items, message);
                interceptor.intercept(&context).await?;
            }
        }

        Ok(())
    }

    /// Identity used in interception contexts: the sender connection's id
    /// and session items, or the broker's own id with the process-wide
    /// server items for broker-originated messages.
    fn sender_identity(&self, sender: &Option<Arc<Connection>>) -> (String, SessionItems) {
        match sender {
            Some(connection) => (
                connection.client_id().to_string(),
                connection.session().items(),
            ),
            None => (
                self.options.client_id.clone(),
                self.server_session_items.clone(),
            ),
        }
    }
}
