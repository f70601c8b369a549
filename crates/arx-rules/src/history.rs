//! Bounded event history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// An event payload recorded at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(data: Value, timestamp: DateTime<Utc>) -> Self {
        Self { data, timestamp }
    }
}

/// Fixed-capacity FIFO buffer of event records
///
/// Once full, every push evicts the oldest record, so `len() <= capacity()`
/// always holds.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    records: VecDeque<EventRecord>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full
    pub fn push(&mut self, record: EventRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Owned copy of the current contents
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.iter().cloned().collect()
    }

    /// Records strictly newer than `cutoff`
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<EventRecord> {
        self.records
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<&EventRecord> {
        self.records.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut buffer = HistoryBuffer::new(3);
        for i in 0..4 {
            buffer.push(EventRecord::new(json!({"seq": i}), at(i)));
        }

        assert_eq!(buffer.len(), 3);
        let seqs: Vec<_> = buffer.iter().map(|r| r.data["seq"].clone()).collect();
        assert_eq!(seqs, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(buffer.latest().unwrap().data["seq"], 3);
    }

    #[test]
    fn test_since_is_strict() {
        let mut buffer = HistoryBuffer::new(10);
        for i in 0..5 {
            buffer.push(EventRecord::new(json!({}), at(i)));
        }
        assert_eq!(buffer.since(at(2)).len(), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buffer = HistoryBuffer::new(0);
        buffer.push(EventRecord::new(json!({}), at(0)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut buffer = HistoryBuffer::new(2);
        buffer.push(EventRecord::new(json!({"v": 1}), at(0)));
        let snapshot = buffer.snapshot();
        buffer.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(buffer.is_empty());
    }
}
