//! Logical-replication change source backed by the `wal2json` output plugin
//! (format version 2, one JSON document per change).
//!
//! Only row actions are relayed: `I` (insert), `U` (update) and `D` (delete).
//! `B`/`C` (transaction boundaries) only carry the commit timestamp forward;
//! `T` (truncate) and `M` (logical message) are ignored.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use sqlx::Row;
use sqlx::postgres::PgPool;
use tracing::warn;

use super::{ChangeKind, ChangeSource, ChangeSourceError, RawChangeRecord};
use crate::store::{PostgresStore, map_sqlx_error};

/// Parse a textual LSN (`X/Y`) into its 64-bit position.
pub fn parse_lsn(lsn: &str) -> Option<i64> {
    let (hi, lo) = lsn.split_once('/')?;
    let hi = u64::from_str_radix(hi, 16).ok()?;
    let lo = u64::from_str_radix(lo, 16).ok()?;
    i64::try_from((hi << 32) | lo).ok()
}

#[derive(Debug, Deserialize)]
struct Wal2JsonChange {
    action: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    identity: Vec<Column>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
    #[serde(default)]
    value: JsonValue,
}

fn row_image(columns: Vec<Column>) -> Option<JsonValue> {
    if columns.is_empty() {
        return None;
    }
    let row: Map<String, JsonValue> = columns.into_iter().map(|c| (c.name, c.value)).collect();
    Some(JsonValue::Object(row))
}

fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z")
        .ok()
        .map(|t| t.timestamp_millis())
}

/// Stateful decoder: tracks the commit timestamp of the current transaction.
#[derive(Debug, Default)]
pub struct Wal2JsonDecoder {
    commit_timestamp_ms: Option<i64>,
}

impl Wal2JsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one plugin document. Returns `Ok(None)` for non-row actions.
    pub fn decode(
        &mut self,
        data: &str,
        lsn: Option<i64>,
        xid: Option<i64>,
    ) -> Result<Option<RawChangeRecord>, serde_json::Error> {
        let change: Wal2JsonChange = serde_json::from_str(data)?;

        let kind = match change.action.as_str() {
            "B" => {
                self.commit_timestamp_ms =
                    change.timestamp.as_deref().and_then(parse_timestamp_ms);
                return Ok(None);
            }
            "C" => {
                if let Some(ts) = change.timestamp.as_deref().and_then(parse_timestamp_ms) {
                    self.commit_timestamp_ms = Some(ts);
                }
                return Ok(None);
            }
            "I" => ChangeKind::Insert,
            "U" => ChangeKind::Update,
            "D" => ChangeKind::Delete,
            _ => return Ok(None),
        };

        let (old_row, new_row) = match kind {
            ChangeKind::Insert => (None, row_image(change.columns)),
            ChangeKind::Update => (row_image(change.identity), row_image(change.columns)),
            _ => (row_image(change.identity), None),
        };

        Ok(Some(RawChangeRecord {
            table: change.table.unwrap_or_default(),
            schema: change.schema.unwrap_or_else(|| "public".to_string()),
            kind,
            old_row,
            new_row,
            transaction_id: xid,
            lsn,
            commit_timestamp_ms: self.commit_timestamp_ms,
        }))
    }
}

/// Polls a logical replication slot with `pg_logical_slot_peek_changes` and
/// advances it on commit.
pub struct PgLogicalSlotSource {
    pool: PgPool,
    slot: String,
    max_batch: i32,
    decoder: Wal2JsonDecoder,
    last_lsn: Option<String>,
}

impl PgLogicalSlotSource {
    pub fn new(pool: PgPool, slot: impl Into<String>, max_batch: i32) -> Self {
        Self {
            pool,
            slot: slot.into(),
            max_batch,
            decoder: Wal2JsonDecoder::new(),
            last_lsn: None,
        }
    }

    /// Source sharing the connection pool of `store`.
    pub fn for_store(store: &PostgresStore, slot: impl Into<String>, max_batch: i32) -> Self {
        Self::new(store.pool().clone(), slot, max_batch)
    }

    /// Create the slot if it does not exist yet.
    pub async fn ensure_slot(&self) -> Result<(), ChangeSourceError> {
        sqlx::query(
            r#"
            SELECT pg_create_logical_replication_slot($1, 'wal2json')
            WHERE NOT EXISTS (SELECT 1 FROM pg_replication_slots WHERE slot_name = $1)
            "#,
        )
        .bind(&self.slot)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_slot", e))?;
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for PgLogicalSlotSource {
    async fn poll(&mut self) -> Result<Vec<RawChangeRecord>, ChangeSourceError> {
        let rows = sqlx::query(
            r#"
            SELECT lsn::text AS lsn, xid::text AS xid, data
            FROM pg_logical_slot_peek_changes(
                $1, NULL, $2,
                'format-version', '2',
                'include-timestamp', 'true',
                'include-transaction', 'true'
            )
            "#,
        )
        .bind(&self.slot)
        .bind(self.max_batch)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("poll_changes", e))?;

        let mut batch = Vec::with_capacity(rows.len());
        self.last_lsn = None;
        for row in rows {
            let lsn_text: String = row.try_get("lsn").map_err(|e| map_sqlx_error("poll_changes", e))?;
            let xid_text: String = row.try_get("xid").map_err(|e| map_sqlx_error("poll_changes", e))?;
            let data: String = row.try_get("data").map_err(|e| map_sqlx_error("poll_changes", e))?;

            let lsn = parse_lsn(&lsn_text);
            let xid = xid_text.parse::<i64>().ok();
            match self.decoder.decode(&data, lsn, xid) {
                Ok(Some(record)) => batch.push(record),
                Ok(None) => {}
                Err(e) => warn!(lsn = %lsn_text, error = %e, "ignoring undecodable wal2json document"),
            }
            self.last_lsn = Some(lsn_text);
        }
        Ok(batch)
    }

    async fn commit(&mut self) -> Result<(), ChangeSourceError> {
        let Some(lsn) = self.last_lsn.take() else {
            return Ok(());
        };
        sqlx::query("SELECT pg_replication_slot_advance($1, $2::pg_lsn)")
            .bind(&self.slot)
            .bind(&lsn)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("commit_changes", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_textual_lsn() {
        assert_eq!(parse_lsn("0/16B3748"), Some(0x16B3748));
        assert_eq!(parse_lsn("1/0"), Some(1 << 32));
        assert_eq!(parse_lsn("garbage"), None);
    }

    #[test]
    fn decodes_row_actions_and_carries_commit_time() {
        let mut decoder = Wal2JsonDecoder::new();

        let begin = r#"{"action":"B","timestamp":"2021-03-01 10:00:00.5+00"}"#;
        assert!(decoder.decode(begin, Some(1), Some(9)).unwrap().is_none());

        let insert = json!({
            "action": "I", "schema": "public", "table": "comment_upvote",
            "columns": [
                { "name": "commentId", "type": "text", "value": "c1" },
                { "name": "userId", "type": "text", "value": "u2" }
            ]
        })
        .to_string();
        let record = decoder.decode(&insert, Some(2), Some(9)).unwrap().unwrap();

        assert_eq!(record.kind, ChangeKind::Insert);
        assert_eq!(record.table, "comment_upvote");
        assert!(record.old_row.is_none());
        assert_eq!(record.new_row, Some(json!({ "commentId": "c1", "userId": "u2" })));
        assert_eq!(record.transaction_id, Some(9));
        assert_eq!(record.commit_timestamp_ms, Some(1_614_592_800_500));
    }

    #[test]
    fn begin_without_timestamp_clears_previous_commit_time() {
        let mut decoder = Wal2JsonDecoder::new();
        let insert = json!({
            "action": "I", "schema": "public", "table": "post",
            "columns": [{ "name": "id", "type": "text", "value": "p1" }]
        })
        .to_string();

        decoder
            .decode(r#"{"action":"B","timestamp":"2021-03-01 10:00:00+00"}"#, None, Some(1))
            .unwrap();
        let first = decoder.decode(&insert, None, Some(1)).unwrap().unwrap();
        assert_eq!(first.commit_timestamp_ms, Some(1_614_592_800_000));
        decoder.decode(r#"{"action":"C"}"#, None, Some(1)).unwrap();

        decoder.decode(r#"{"action":"B"}"#, None, Some(2)).unwrap();
        let second = decoder.decode(&insert, None, Some(2)).unwrap().unwrap();
        assert_eq!(second.commit_timestamp_ms, None);
    }

    #[test]
    fn update_and_delete_use_identity_as_old_image() {
        let mut decoder = Wal2JsonDecoder::new();

        let update = json!({
            "action": "U", "schema": "public", "table": "user",
            "columns": [{ "name": "devcardEligible", "type": "boolean", "value": true }],
            "identity": [{ "name": "devcardEligible", "type": "boolean", "value": false }]
        })
        .to_string();
        let record = decoder.decode(&update, None, None).unwrap().unwrap();
        assert_eq!(record.kind, ChangeKind::Update);
        assert_eq!(record.old_row, Some(json!({ "devcardEligible": false })));
        assert_eq!(record.new_row, Some(json!({ "devcardEligible": true })));

        let delete = json!({
            "action": "D", "schema": "public", "table": "upvote",
            "identity": [{ "name": "postId", "type": "text", "value": "p1" }]
        })
        .to_string();
        let record = decoder.decode(&delete, None, None).unwrap().unwrap();
        assert_eq!(record.kind, ChangeKind::Delete);
        assert!(record.new_row.is_none());
    }

    #[test]
    fn ignores_truncate_and_messages() {
        let mut decoder = Wal2JsonDecoder::new();
        for doc in [
            r#"{"action":"T","schema":"public","table":"post"}"#,
            r#"{"action":"M","transactional":false,"prefix":"x","content":"y"}"#,
            r#"{"action":"C"}"#,
        ] {
            assert!(decoder.decode(doc, None, None).unwrap().is_none());
        }
        assert!(decoder.decode("not json", None, None).is_err());
    }
}
