//! Turning inserted message rows into [`ChatMessage`]s.

use super::types::RawChangeEvent;
use crate::error::{Result, SyncError};
use crate::types::{ChatMessage, MessageSender};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// The columns read from an inserted message row.
#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    content: String,
    created_at: String,
}

/// Translate an insert event into a message.
///
/// Channel-delivered messages are always from the assistant and always
/// complete. Any failure comes back as [`SyncError::Transformation`].
pub fn translate_insert(event: &RawChangeEvent) -> Result<ChatMessage> {
    translate_row(event).map_err(SyncError::into_transformation)
}

fn translate_row(event: &RawChangeEvent) -> Result<ChatMessage> {
    let row = match &event.record {
        Some(row) if !row.is_null() => row,
        _ => {
            return Err(SyncError::Transformation(
                "event carried no row".to_string(),
            ))
        }
    };

    let row = MessageRow::deserialize(row)?;
    let timestamp = parse_created_at(&row.created_at)?;

    Ok(ChatMessage {
        id: row.id,
        sender: MessageSender::Ai,
        content: row.content,
        timestamp,
        streaming: false,
    })
}

/// Parse a row timestamp.
///
/// Accepts RFC 3339, the Postgres text form (`2024-01-06 12:00:00+00`), and
/// zone-less timestamps, which are taken as UTC.
pub fn parse_created_at(raw: &str) -> Result<DateTime<Utc>> {
    let rfc3339_error = match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => return Ok(parsed.with_timezone(&Utc)),
        Err(e) => e,
    };
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(rfc3339_error.into())
}
