// Metrics frame — the per-user snapshot pushed over the dashboard socket.
//
//! A minimal shape that lets the bus be implemented and tested without
//! guessing at the CRUD domains' real schemas: each partition is
//! `{ summary: <opaque map>, _timestamp: <unix ms> }`, and the frame is a
//! map of partition name to partition value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;

/// The fixed set of dashboard partitions.
pub const PARTITIONS: &[&str] = &[
    "habits",
    "todos",
    "tasks",
    "daily_timeline",
    "habit_heatmap",
    "mood",
    "notes",
    "journals",
    "calendar",
    "focus",
    "ai_usage",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionValue {
    pub summary: Value,
    #[serde(rename = "_timestamp")]
    pub timestamp: i64,
}

impl PartitionValue {
    pub fn new(summary: Value, timestamp_ms: i64) -> Self {
        Self {
            summary,
            timestamp: timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsFrame {
    #[serde(flatten)]
    pub partitions: HashMap<String, PartitionValue>,
}

impl MetricsFrame {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, partition: impl Into<String>, value: PartitionValue) {
        self.partitions.insert(partition.into(), value);
    }

    /// Keeps only the named partitions; used when building a partial-refresh
    /// message so the client receives just the delta it asked for.
    pub fn only(&self, names: &[&str]) -> MetricsFrame {
        MetricsFrame {
            partitions: self
                .partitions
                .iter()
                .filter(|(k, _)| names.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn merge(&mut self, other: MetricsFrame) {
        for (k, v) in other.partitions {
            self.partitions.insert(k, v);
        }
    }

    /// The maximum `_timestamp` across every partition in this frame, used
    /// to check that consecutive frames strictly increase.
    pub fn max_timestamp(&self) -> Option<i64> {
        self.partitions.values().map(|p| p.timestamp).max()
    }
}

/// Computes metrics-frame data for a user. Querying the CRUD domains for
/// real habit streaks, todo counts etc. is an external collaborator; this
/// core only defines the seam.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn compute_frame(&self, user_id: Uuid, now_ms: i64) -> Result<MetricsFrame>;

    async fn compute_partition(
        &self,
        user_id: Uuid,
        partition: &str,
        now_ms: i64,
    ) -> Result<Option<PartitionValue>>;
}

/// Default source returning empty summaries for every partition — lets the
/// bus run and be tested end-to-end without the real CRUD domains wired up.
pub struct NullMetricsSource;

#[async_trait]
impl MetricsSource for NullMetricsSource {
    async fn compute_frame(&self, _user_id: Uuid, now_ms: i64) -> Result<MetricsFrame> {
        let mut frame = MetricsFrame::empty();
        for partition in PARTITIONS {
            frame.insert(
                *partition,
                PartitionValue::new(Value::Object(Default::default()), now_ms),
            );
        }
        Ok(frame)
    }

    async fn compute_partition(
        &self,
        _user_id: Uuid,
        partition: &str,
        now_ms: i64,
    ) -> Result<Option<PartitionValue>> {
        if PARTITIONS.contains(&partition) {
            Ok(Some(PartitionValue::new(
                Value::Object(Default::default()),
                now_ms,
            )))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_keeps_named_partitions() {
        let mut frame = MetricsFrame::empty();
        frame.insert("todos", PartitionValue::new(Value::Null, 1));
        frame.insert("mood", PartitionValue::new(Value::Null, 2));
        frame.insert("focus", PartitionValue::new(Value::Null, 3));

        let narrowed = frame.only(&["todos", "mood"]);
        assert_eq!(narrowed.partitions.len(), 2);
        assert!(narrowed.partitions.contains_key("todos"));
        assert!(narrowed.partitions.contains_key("mood"));
        assert!(!narrowed.partitions.contains_key("focus"));
    }

    #[test]
    fn merge_overwrites_by_partition_name() {
        let mut frame = MetricsFrame::empty();
        frame.insert("todos", PartitionValue::new(json!({"count": 1}), 1));

        let mut update = MetricsFrame::empty();
        update.insert("todos", PartitionValue::new(json!({"count": 2}), 5));
        frame.merge(update);

        assert_eq!(frame.partitions["todos"].timestamp, 5);
        assert_eq!(frame.partitions["todos"].summary, json!({"count": 2}));
    }

    #[test]
    fn max_timestamp_is_the_greatest_across_partitions() {
        let mut frame = MetricsFrame::empty();
        frame.insert("todos", PartitionValue::new(Value::Null, 3));
        frame.insert("mood", PartitionValue::new(Value::Null, 9));
        assert_eq!(frame.max_timestamp(), Some(9));
    }

    #[test]
    fn max_timestamp_of_empty_frame_is_none() {
        assert_eq!(MetricsFrame::empty().max_timestamp(), None);
    }

    #[tokio::test]
    async fn null_metrics_source_covers_every_partition() {
        let source = NullMetricsSource;
        let frame = source.compute_frame(Uuid::new_v4(), 42).await.unwrap();
        assert_eq!(frame.partitions.len(), PARTITIONS.len());
        for partition in PARTITIONS {
            assert!(frame.partitions.contains_key(*partition));
        }
    }

    #[tokio::test]
    async fn null_metrics_source_rejects_unknown_partition() {
        let source = NullMetricsSource;
        let result = source
            .compute_partition(Uuid::new_v4(), "not_a_partition", 42)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
