//! Change-data-capture envelope.
//!
//! One `ChangeEnvelope` describes one row-level change on one table. The
//! shape mirrors the connector format consumed by the `cdc` subscription:
//! `{ schema, payload: { before, after, source, op, ts_ms, transaction } }`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    /// Snapshot read of an existing row.
    #[serde(rename = "r")]
    Read,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "c",
            ChangeOperation::Update => "u",
            ChangeOperation::Delete => "d",
            ChangeOperation::Read => "r",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub fields: Vec<JsonValue>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub name: String,
}

impl ChangeSchema {
    pub fn for_table(db: &str, schema: &str, table: &str) -> Self {
        Self {
            kind: "struct".to_string(),
            fields: Vec::new(),
            optional: false,
            name: format!("{db}.{schema}.{table}.Envelope"),
        }
    }
}

/// Connector source block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub version: String,
    pub connector: String,
    pub name: String,
    pub ts_ms: i64,
    #[serde(default)]
    pub snapshot: bool,
    pub db: String,
    #[serde(default)]
    pub sequence: Option<String>,
    pub schema: String,
    pub table: String,
    #[serde(rename = "txId", default)]
    pub tx_id: Option<i64>,
    #[serde(default)]
    pub lsn: Option<i64>,
    #[serde(default)]
    pub xmin: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload<T> {
    pub before: Option<T>,
    pub after: Option<T>,
    pub source: SourceInfo,
    pub op: ChangeOperation,
    pub ts_ms: i64,
    #[serde(rename = "transaction", default)]
    pub transaction_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope<T = JsonValue> {
    pub schema: ChangeSchema,
    pub payload: ChangePayload<T>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChangeShapeError {
    #[error("create change on {table} must have `after` and no `before`")]
    Create { table: String },
    #[error("delete change on {table} must have `before` and no `after`")]
    Delete { table: String },
    #[error("update change on {table} carries no row image")]
    Update { table: String },
    #[error("snapshot read on {table} carries no row image")]
    Read { table: String },
    #[error("change is missing its source table")]
    MissingTable,
}

impl<T> ChangeEnvelope<T> {
    pub fn table(&self) -> &str {
        &self.payload.source.table
    }

    pub fn op(&self) -> ChangeOperation {
        self.payload.op
    }

    pub fn before(&self) -> Option<&T> {
        self.payload.before.as_ref()
    }

    pub fn after(&self) -> Option<&T> {
        self.payload.after.as_ref()
    }

    /// Check the before/after presence rule for the operation:
    /// create has only `after`, delete has only `before`. Update and read
    /// carry both or either, depending on the table's replica identity.
    pub fn validate(&self) -> Result<(), ChangeShapeError> {
        let table = self.table();
        if table.is_empty() {
            return Err(ChangeShapeError::MissingTable);
        }
        let table = table.to_string();
        let (before, after) = (self.payload.before.is_some(), self.payload.after.is_some());
        match self.payload.op {
            ChangeOperation::Create if before || !after => Err(ChangeShapeError::Create { table }),
            ChangeOperation::Delete if !before || after => Err(ChangeShapeError::Delete { table }),
            ChangeOperation::Update if !before && !after => Err(ChangeShapeError::Update { table }),
            ChangeOperation::Read if !before && !after => Err(ChangeShapeError::Read { table }),
            _ => Ok(()),
        }
    }
}

impl ChangeEnvelope<JsonValue> {
    /// Reinterpret the untyped row images as a concrete row type.
    pub fn rows<R: DeserializeOwned>(self) -> Result<ChangeEnvelope<R>, serde_json::Error> {
        let ChangePayload {
            before,
            after,
            source,
            op,
            ts_ms,
            transaction_id,
        } = self.payload;
        let before = before
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        let after = after
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        Ok(ChangeEnvelope {
            schema: self.schema,
            payload: ChangePayload {
                before,
                after,
                source,
                op,
                ts_ms,
                transaction_id,
            },
        })
    }
}
