use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DeliveryError;

/// Queue event document: the unit a queue trigger hands over.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QueueEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueRecord {
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Usually the JSON payload as a string; producers that inline the object are accepted too.
    #[serde(default)]
    pub body: Value,
}

impl QueueRecord {
    /// Raw payload bytes. A missing body becomes an empty payload, which the decoder rejects.
    fn payload(&self) -> Vec<u8> {
        match &self.body {
            Value::Null => Vec::new(),
            Value::String(text) => text.clone().into_bytes(),
            inline => inline.to_string().into_bytes(),
        }
    }
}

/// Payloads received together from the queue, in delivery order.
#[derive(Debug, Clone)]
pub struct RawDelivery {
    id: Uuid,
    payloads: Vec<Vec<u8>>,
}

impl RawDelivery {
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payloads,
        }
    }

    /// Read a queue event document. Only an unreadable document fails here;
    /// a bad record body is carried through and rejected on its own.
    pub fn from_queue_event(document: &[u8]) -> Result<Self, DeliveryError> {
        let event: QueueEvent = serde_json::from_slice(document)
            .map_err(|e| DeliveryError::MalformedDelivery(e.to_string()))?;
        Ok(Self::from(event))
    }

    /// Identifier used to correlate log lines of one delivery.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn payloads(&self) -> impl Iterator<Item = &[u8]> {
        self.payloads.iter().map(Vec::as_slice)
    }
}

impl From<QueueEvent> for RawDelivery {
    fn from(event: QueueEvent) -> Self {
        Self::new(event.records.iter().map(QueueRecord::payload).collect())
    }
}

impl QueueEvent {
    /// Wrap payload objects as string bodies, the way the queue delivers them.
    pub fn from_payloads(payloads: &[Value]) -> Self {
        Self {
            records: payloads
                .iter()
                .map(|payload| QueueRecord {
                    message_id: Some(Uuid::new_v4().to_string()),
                    body: Value::String(payload.to_string()),
                })
                .collect(),
        }
    }
}
