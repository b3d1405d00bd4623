//! Change-data-capture relay.
//!
//! Raw row changes from a `ChangeSource` are normalized into
//! `ChangeEnvelope`s and published on `CHANGE_TOPIC`, so they reach the
//! `cdc` worker through the same dispatch path as any other message.

mod normalizer;
mod relay;
mod source;
mod wal2json;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use normalizer::{CdcNormalizer, NormalizeError};
pub use relay::{ChangeRelay, RelayError, RelayHandle, RelayStats};
pub use source::{ChangeSource, ChangeSourceError, ChannelChangeSource};
pub use wal2json::{PgLogicalSlotSource, Wal2JsonDecoder, parse_lsn};

/// Topic every normalized change is published on.
pub const CHANGE_TOPIC: &str = "api.changes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Snapshot,
}

/// One row-level change as captured from the database log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeRecord {
    pub table: String,
    pub schema: String,
    pub kind: ChangeKind,
    pub old_row: Option<JsonValue>,
    pub new_row: Option<JsonValue>,
    pub transaction_id: Option<i64>,
    pub lsn: Option<i64>,
    pub commit_timestamp_ms: Option<i64>,
}

impl RawChangeRecord {
    pub fn insert(table: &str, row: JsonValue) -> Self {
        Self::new(table, ChangeKind::Insert, None, Some(row))
    }

    pub fn update(table: &str, old_row: Option<JsonValue>, new_row: JsonValue) -> Self {
        Self::new(table, ChangeKind::Update, old_row, Some(new_row))
    }

    pub fn delete(table: &str, row: JsonValue) -> Self {
        Self::new(table, ChangeKind::Delete, Some(row), None)
    }

    pub fn snapshot(table: &str, row: JsonValue) -> Self {
        Self::new(table, ChangeKind::Snapshot, None, Some(row))
    }

    fn new(
        table: &str,
        kind: ChangeKind,
        old_row: Option<JsonValue>,
        new_row: Option<JsonValue>,
    ) -> Self {
        Self {
            table: table.to_string(),
            schema: "public".to_string(),
            kind,
            old_row,
            new_row,
            transaction_id: None,
            lsn: None,
            commit_timestamp_ms: None,
        }
    }
}
