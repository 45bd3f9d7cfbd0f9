//! Normalized log and status records.
//!
//! Producers are loose about field names (`content` vs `message`,
//! `log_type` vs `level`, ...). Records give viewers one stable shape while
//! passing every other field through untouched in `extra`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Fields, RawEntry, StreamId};

/// Channel tags that count as the primary delivery path.
const PRIMARY_CHANNELS: [&str; 3] = ["redis_stream", "redis", "default"];

const LOG_RECORD_FIELDS: [&str; 16] = [
    "id",
    "task_id",
    "timestamp",
    "level",
    "message",
    "source",
    "host_id",
    "host_name",
    "host_ip",
    "step_id",
    "step_name",
    "step_order",
    "channel",
    "fallback_channel",
    "structured",
    "missing_fields",
];

const STATUS_RECORD_FIELDS: [&str; 4] = ["id", "task_id", "status", "detail"];

/// Event discriminator on the wire; producer fields may not shadow it.
const TAG_FIELD: &str = "type";
/// Where a producer's own `type` field ends up.
const RENAMED_TAG_FIELD: &str = "entry_type";

/// Producer fields outside `reserved`, with `type` moved to `entry_type`.
fn passthrough(entry: &RawEntry, reserved: &[&str]) -> Fields {
    let mut extra: Fields = entry
        .fields
        .iter()
        .filter(|(k, _)| !reserved.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(tag) = extra.remove(TAG_FIELD) {
        extra.entry(RENAMED_TAG_FIELD).or_insert(tag);
    }
    extra
}

/// A log entry in the shape viewers rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: StreamId,
    pub task_id: String,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub source: String,
    pub host_id: String,
    pub host_name: String,
    pub host_ip: String,
    pub step_id: String,
    pub step_name: String,
    pub step_order: i64,
    pub channel: String,
    pub fallback_channel: bool,
    pub structured: bool,
    pub missing_fields: Vec<String>,
    /// Producer fields with no dedicated slot, passed through as-is.
    #[serde(flatten)]
    pub extra: Fields,
}

impl LogRecord {
    /// Normalize a raw log entry belonging to `task_id`.
    ///
    /// Never fails: absent fields get placeholders and are listed in
    /// `missing_fields`.
    #[must_use]
    pub fn normalize(entry: &RawEntry, task_id: &str) -> Self {
        let mut missing_fields = Vec::new();

        let host = entry.first_text(&["host_id", "host_name", "host_ip"]);
        let host_id = host.unwrap_or_else(|| {
            missing_fields.push("host".to_string());
            "unknown_host".to_string()
        });
        let host_name = entry.text("host_name").unwrap_or_else(|| host_id.clone());
        let host_ip = entry.text("host_ip").unwrap_or_default();

        let step_order = entry
            .text("step_order")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let step_name = entry.first_text(&["step_name", "step"]).unwrap_or_else(|| {
            missing_fields.push("step".to_string());
            "unknown_step".to_string()
        });
        let step_id = entry.text("step_id").unwrap_or_else(|| {
            if step_order == 0 {
                "unknown_step".to_string()
            } else {
                format!("step_{step_order}")
            }
        });

        let channel = entry
            .first_text(&["channel", "log_channel"])
            .unwrap_or_else(|| PRIMARY_CHANNELS[0].to_string());
        let fallback_channel = !PRIMARY_CHANNELS.contains(&channel.as_str());

        let extra = passthrough(entry, &LOG_RECORD_FIELDS);

        Self {
            id: entry.id.clone(),
            task_id: task_id.to_string(),
            timestamp: entry
                .text("timestamp")
                .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
            level: entry
                .first_text(&["level", "log_type", "stream"])
                .unwrap_or_else(|| "info".to_string()),
            message: entry.first_text(&["message", "content"]).unwrap_or_default(),
            source: entry.text("source").unwrap_or_else(|| host_id.clone()),
            host_id,
            host_name,
            host_ip,
            step_id,
            step_name,
            step_order,
            channel,
            fallback_channel,
            structured: missing_fields.is_empty(),
            missing_fields,
            extra,
        }
    }
}

/// Entry that cannot be turned into a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("status entry {0} has no status value")]
    MissingStatus(StreamId),
}

/// A status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: StreamId,
    pub task_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub extra: Fields,
}

impl StatusRecord {
    /// Parse a raw status entry belonging to `task_id`.
    ///
    /// # Errors
    /// Returns `RecordError::MissingStatus` when the entry carries no
    /// textual `status` field.
    pub fn parse(entry: &RawEntry, task_id: &str) -> Result<Self, RecordError> {
        let status = entry
            .text("status")
            .ok_or_else(|| RecordError::MissingStatus(entry.id.clone()))?;

        let extra = passthrough(entry, &STATUS_RECORD_FIELDS);

        Ok(Self {
            id: entry.id.clone(),
            task_id: task_id.to_string(),
            status,
            detail: entry.first_text(&["detail", "message"]),
            extra,
        })
    }
}
