use std::sync::Arc;

use chrono::Utc;
use courier_events::{
    ChangeEnvelope, ChangeOperation, ChangePayload, ChangeSchema, ChangeShapeError, SourceInfo,
    PushMessage, codec,
};
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::{CHANGE_TOPIC, ChangeKind, RawChangeRecord};
use crate::publish::{MessagePublisher, PublishError};

const CONNECTOR: &str = "postgresql";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Shape(#[from] ChangeShapeError),

    #[error("row image for {table} is not a JSON object")]
    RowNotObject { table: String },
}

/// Turns raw change records into change envelopes and publishes them.
#[derive(Clone)]
pub struct CdcNormalizer {
    db: String,
    server_name: String,
    publisher: Arc<dyn MessagePublisher>,
}

impl CdcNormalizer {
    pub fn new(
        db: impl Into<String>,
        server_name: impl Into<String>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            db: db.into(),
            server_name: server_name.into(),
            publisher,
        }
    }

    /// Reshape a raw record. Row images are copied verbatim.
    pub fn normalize(&self, raw: RawChangeRecord) -> Result<ChangeEnvelope, NormalizeError> {
        for row in [&raw.old_row, &raw.new_row].into_iter().flatten() {
            if !row.is_object() {
                return Err(NormalizeError::RowNotObject {
                    table: raw.table.clone(),
                });
            }
        }

        let op = match raw.kind {
            ChangeKind::Insert => ChangeOperation::Create,
            ChangeKind::Update => ChangeOperation::Update,
            ChangeKind::Delete => ChangeOperation::Delete,
            ChangeKind::Snapshot => ChangeOperation::Read,
        };
        let now_ms = Utc::now().timestamp_millis();
        let ts_ms = raw.commit_timestamp_ms.unwrap_or(now_ms);
        let sequence = raw
            .lsn
            .map(|lsn| JsonValue::from(vec![lsn.to_string()]).to_string());

        let envelope = ChangeEnvelope {
            schema: ChangeSchema::for_table(&self.server_name, &raw.schema, &raw.table),
            payload: ChangePayload {
                before: raw.old_row,
                after: raw.new_row,
                source: SourceInfo {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    connector: CONNECTOR.to_string(),
                    name: self.server_name.clone(),
                    ts_ms,
                    snapshot: op == ChangeOperation::Read,
                    db: self.db.clone(),
                    sequence,
                    schema: raw.schema,
                    table: raw.table,
                    tx_id: raw.transaction_id,
                    lsn: raw.lsn,
                    xmin: None,
                },
                op,
                ts_ms: now_ms,
                transaction_id: raw.transaction_id,
            },
        };

        envelope.validate()?;
        Ok(envelope)
    }

    /// Publish an envelope on the change topic; returns the wire message.
    pub async fn publish(&self, envelope: &ChangeEnvelope) -> Result<PushMessage, PublishError> {
        let value = serde_json::to_value(envelope).map_err(|source| PublishError::Encode {
            topic: CHANGE_TOPIC.to_string(),
            source,
        })?;
        let id = self.publisher.publish(CHANGE_TOPIC, &value).await?;
        codec::encode(id, &value).map_err(|source| PublishError::Encode {
            topic: CHANGE_TOPIC.to_string(),
            source,
        })
    }
}
