//! Configuration for the scheduler and the realtime layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::SubjectId;

/// Scheduler cadences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Trailing-edge debounce for the deferred tier.
    /// Default: 200ms
    #[serde(rename = "deferred_delay_ms", with = "duration_ms")]
    pub deferred_delay: Duration,

    /// Delay used for the background tier when the runtime has no idle
    /// scheduling.
    /// Default: 500ms
    #[serde(rename = "idle_fallback_delay_ms", with = "duration_ms")]
    pub idle_fallback_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deferred_delay: Duration::from_millis(200),
            idle_fallback_delay: Duration::from_millis(500),
        }
    }
}

/// Where inbound message rows come from and how channels are named.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub schema: String,
    pub table: String,
    /// Row column holding the subject id.
    pub subject_column: String,
    pub channel_prefix: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table: "messages".to_string(),
            subject_column: "thread_id".to_string(),
            channel_prefix: "messages".to_string(),
        }
    }
}

impl RealtimeConfig {
    /// Channel name for a subject. Same id, same name.
    pub fn channel_name(&self, subject: &SubjectId) -> String {
        format!("{}:{}", self.channel_prefix, subject)
    }

    /// Row filter restricting inserts to one subject.
    pub fn subject_filter(&self, subject: &SubjectId) -> String {
        format!("{}=eq.{}", self.subject_column, subject)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
