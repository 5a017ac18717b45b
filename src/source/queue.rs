//! Queue source: at-least-once delivery with visibility-timeout leases

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Commit, StreamSource};
use crate::config::QueueSourceConfig;
use crate::error::{Result, TransportError};
use crate::transport::{QueueClient, QueueMessage, ReceiveRequest};
use crate::types::{AckToken, RawEvent, SENT_TIMESTAMP};
use crate::utils::time::{now_utc, parse_epoch};

/// Where the queue source is in its fetch/ack cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Fetching,
    Empty,
    Delivering,
    AckPending,
}

/// Consumes a single queue
pub struct QueueSource {
    client: Arc<dyn QueueClient>,
    config: QueueSourceConfig,
    state: QueueState,
}

impl QueueSource {
    pub fn new(client: Arc<dyn QueueClient>, config: QueueSourceConfig) -> Self {
        Self {
            client,
            config,
            state: QueueState::Idle,
        }
    }

    pub fn config(&self) -> &QueueSourceConfig {
        &self.config
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            max_messages: self.config.max_messages,
            wait: self.config.wait_time,
            visibility_timeout: self.config.visibility_timeout,
            attribute_names: self.config.attribute_names.clone(),
        }
    }
}

/// Map a transport message onto a `RawEvent`.
///
/// `received_at` comes from the `SentTimestamp` attribute when present and
/// parsable, otherwise from the time of the fetch.
pub fn raw_event_from_message(message: QueueMessage, fetched_at: DateTime<Utc>) -> RawEvent {
    let received_at = message
        .attributes
        .get(SENT_TIMESTAMP)
        .and_then(|ts| parse_epoch(ts))
        .unwrap_or(fetched_at);

    RawEvent {
        id: message.message_id,
        received_at,
        attributes: message.attributes,
        body: message.body,
        ack_token: AckToken::Receipt(message.receipt_handle),
    }
}

impl StreamSource for QueueSource {
    fn name(&self) -> &str {
        &self.config.queue_name
    }

    fn fetch(&mut self) -> Result<Vec<RawEvent>> {
        self.state = QueueState::Fetching;
        let request = self.receive_request();

        let messages = match self.client.receive(&self.config.queue_name, &request) {
            Ok(messages) => messages,
            Err(e) => {
                self.state = QueueState::Idle;
                return Err(e.into());
            }
        };
        tracing::info!(queue = %self.config.queue_name, count = messages.len(), "message count");

        let fetched_at = now_utc();
        let events: Vec<RawEvent> = messages
            .into_iter()
            .map(|m| raw_event_from_message(m, fetched_at))
            .collect();

        self.state = if events.is_empty() {
            QueueState::Empty
        } else {
            QueueState::Delivering
        };
        Ok(events)
    }

    fn commit(&mut self, events: &[RawEvent]) -> Commit {
        if events.is_empty() {
            self.state = QueueState::Idle;
            return Commit::default();
        }
        self.state = QueueState::AckPending;

        let commit = if !self.config.ack.delete_messages {
            tracing::debug!(
                queue = %self.config.queue_name,
                count = events.len(),
                "message deletion disabled, messages will be redelivered"
            );
            Commit {
                skipped: events.len(),
                ..Default::default()
            }
        } else {
            let handles: Vec<String> = events
                .iter()
                .filter_map(|e| e.ack_token.receipt().map(str::to_string))
                .collect();

            tracing::info!(queue = %self.config.queue_name, count = handles.len(), "delete attempt");
            match self.client.delete(&self.config.queue_name, &handles) {
                Ok(()) => {
                    tracing::info!(queue = %self.config.queue_name, "delete success");
                    Commit {
                        acknowledged: handles.len(),
                        ..Default::default()
                    }
                }
                Err(TransportError::InvalidAckTokens(rejected)) => {
                    tracing::warn!(
                        queue = %self.config.queue_name,
                        rejected = rejected.len(),
                        "delete failure"
                    );
                    let failed = rejected.len().min(handles.len());
                    Commit {
                        acknowledged: handles.len() - failed,
                        failed,
                        ..Default::default()
                    }
                }
                Err(e) => {
                    tracing::warn!(queue = %self.config.queue_name, error = %e, "delete failure");
                    Commit {
                        failed: handles.len(),
                        ..Default::default()
                    }
                }
            }
        };

        self.state = QueueState::Idle;
        commit
    }
}
