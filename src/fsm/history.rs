//! Bounded transition-history ring shared by both FSMs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub event: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryRing {
    records: VecDeque<TransitionRecord>,
}

impl HistoryRing {
    pub fn push(&mut self, from: &str, to: &str, event: &str, payload: serde_json::Value) {
        self.records.push_back(TransitionRecord {
            from: from.to_string(),
            to: to.to_string(),
            event: event.to_string(),
            payload,
            timestamp: Utc::now(),
        });
        if self.records.len() > HISTORY_CAPACITY {
            self.records.pop_front();
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&TransitionRecord> {
        self.records.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_to_100() {
        let mut ring = HistoryRing::default();
        for i in 0..150 {
            ring.push("A", "B", "EVT", serde_json::json!(i));
        }
        assert_eq!(ring.len(), 100);
        assert_eq!(ring.last().unwrap().payload, serde_json::json!(149));
    }

    #[test]
    fn records_preserve_order() {
        let mut ring = HistoryRing::default();
        ring.push("A", "B", "EVT1", serde_json::Value::Null);
        ring.push("B", "C", "EVT2", serde_json::Value::Null);
        let events: Vec<&str> = ring.records().map(|r| r.event.as_str()).collect();
        assert_eq!(events, vec!["EVT1", "EVT2"]);
    }
}
