//! NATS publication of CoT events.
//!
//! Every event is wrapped in the JSON envelope and published to three
//! subjects: the CoT parser subject, the subject of the event's group
//! (`{prefix}.{group}.OUT`), and the firehose. The client is shared by all
//! feed timers; `async_nats::Client` is safe to use concurrently.

use arcfeed_core::config::BusConfig;
use arcfeed_core::wire::encode_envelope;
use arcfeed_core::{PublishError, Publisher};
use arcfeed_types::CotEvent;
use tracing::{debug, info};

use crate::error::BridgeError;

/// Subjects an event is published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSubjects {
    parser: String,
    group_prefix: String,
    firehose: String,
}

impl BusSubjects {
    /// Take the subject names from the bus configuration.
    pub fn from_config(bus: &BusConfig) -> Self {
        Self {
            parser: bus.parser_subject.clone(),
            group_prefix: bus.group_subject_prefix.clone(),
            firehose: bus.firehose_subject.clone(),
        }
    }

    /// Subjects for an event routed to `group`, in publish order.
    pub fn for_group(&self, group: &str) -> [String; 3] {
        [
            self.parser.clone(),
            group_subject(&self.group_prefix, group),
            self.firehose.clone(),
        ]
    }
}

/// `{prefix}.{group}.OUT`, with the group made into a single subject token.
pub fn group_subject(prefix: &str, group: &str) -> String {
    let token: String = group
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '.' | '*' | '>') {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("{prefix}.{token}.OUT")
}

/// [`Publisher`] backed by a NATS connection.
pub struct NatsPublisher {
    client: async_nats::Client,
    node_id: String,
    subjects: BusSubjects,
}

impl NatsPublisher {
    /// Connect to the server named in `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Nats`] if the connection cannot be established.
    pub async fn connect(bus: &BusConfig) -> Result<Self, BridgeError> {
        info!(url = %bus.nats_url, node_id = %bus.node_id, "connecting to NATS server");
        let client = async_nats::connect(bus.nats_url.as_str())
            .await
            .map_err(|e| BridgeError::Nats {
                message: format!("failed to connect to {}: {e}", bus.nats_url),
            })?;
        info!("NATS connection established");
        Ok(Self {
            client,
            node_id: bus.node_id.clone(),
            subjects: BusSubjects::from_config(bus),
        })
    }
}

impl Publisher for NatsPublisher {
    async fn publish(&self, event: &CotEvent, group: &str) -> Result<(), PublishError> {
        let payload = encode_envelope(event, &self.node_id)?;
        debug!(uid = %event.uid, group = group, removal = event.removal, "publishing event");

        for subject in self.subjects.for_group(group) {
            self.client
                .publish(subject.clone(), payload.clone().into())
                .await
                .map_err(|e| PublishError::Transport {
                    subject,
                    message: e.to_string(),
                })?;
        }
        self.client
            .flush()
            .await
            .map_err(|e| PublishError::Transport {
                subject: group.to_owned(),
                message: format!("flush failed: {e}"),
            })
    }
}
