//! Bounded in-memory history of recent tool-call outcomes, used to back the
//! proxy's performance metrics (§3 `CallRecord`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A single recorded call outcome.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub id: String,
    pub tool_name: String,
    pub start_time: Instant,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

/// A ring buffer capped at `capacity` records, oldest dropped on overflow.
#[derive(Debug)]
pub struct CallRecordRing {
    capacity: usize,
    records: VecDeque<CallRecord>,
}

impl CallRecordRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: CallRecord) {
        if self.records.len() >= self.capacity {
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

    pub fn iter(&self) -> impl Iterator<Item = &CallRecord> {
        self.records.iter()
    }
}

impl Default for CallRecordRing {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> CallRecord {
        CallRecord {
            id: id.to_string(),
            tool_name: "add".to_string(),
            start_time: Instant::now(),
            duration: Duration::from_millis(10),
            success: true,
            error: None,
        }
    }

    #[test]
    fn oldest_record_is_dropped_on_overflow() {
        let mut ring = CallRecordRing::new(2);
        ring.push(sample("1"));
        ring.push(sample("2"));
        ring.push(sample("3"));
        let ids: Vec<_> = ring.iter().map(|record| record.id.clone()).collect();
        assert_eq!(ids, vec!["2".to_string(), "3".to_string()]);
    }
}
