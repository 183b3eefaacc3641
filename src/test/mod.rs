//! Test utilities and mock implementations


use crate::client::ShardInfo;
use crate::model::RawRecord;
use bytes::Bytes;
use std::time::Duration;

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// Create a test record with given sequence number and data
    pub fn create_test_record(sequence_number: &str, data: &[u8]) -> RawRecord {
        RawRecord::new(
            sequence_number,
            "test-partition-key",
            Bytes::copy_from_slice(data),
        )
    }

    /// Records `sequence-<i>` carrying the non-JSON payload `data-<i>`
    pub fn create_test_records(count: usize) -> Vec<RawRecord> {
        (0..count)
            .map(|i| {
                Self::create_test_record(
                    &format!("sequence-{}", i),
                    format!("data-{}", i).as_bytes(),
                )
            })
            .collect()
    }

    /// A record whose JSON payload carries `id` and `eventType`
    pub fn create_event_record(sequence_number: &str, id: &str, event_type: &str) -> RawRecord {
        let payload = serde_json::json!({ "id": id, "eventType": event_type });
        Self::create_test_record(sequence_number, payload.to_string().as_bytes())
    }

    pub fn create_test_shard(shard_id: &str) -> ShardInfo {
        ShardInfo::new(shard_id)
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_for_condition<F>(mut check: F, timeout: Duration) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while !check() {
        if start.elapsed() > timeout {
            anyhow::bail!("Condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_records() {
        let records = TestUtils::create_test_records(3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number, "sequence-0");
        assert_eq!(records[2].data.as_ref(), b"data-2");
        assert_eq!(records[1].partition_key, "test-partition-key");
    }

    #[test]
    fn test_create_event_record() -> anyhow::Result<()> {
        let record = TestUtils::create_event_record("7", "a1", "CLICK");
        let value: serde_json::Value = serde_json::from_slice(&record.data)?;
        assert_eq!(value["id"], "a1");
        assert_eq!(value["eventType"], "CLICK");
        Ok(())
    }
}
