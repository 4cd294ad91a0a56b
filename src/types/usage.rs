//! Token usage aggregation (spec.md §4.9 "usage aggregation").

use serde::{Deserialize, Serialize};

/// Token usage and cost for a single assistant message, or the sum of many.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_read_cost: f64,
    pub cache_write_cost: f64,
    pub total_cost: f64,
}

impl Usage {
    /// Componentwise sum; used to fold per-assistant-message usage into a
    /// run total (testable property: `sumAssistantUsage` invariant).
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
        self.total_tokens += other.total_tokens;
        self.input_cost += other.input_cost;
        self.output_cost += other.output_cost;
        self.cache_read_cost += other.cache_read_cost;
        self.cache_write_cost += other.cache_write_cost;
        self.total_cost += other.total_cost;
    }

    pub fn sum<'a>(items: impl IntoIterator<Item = &'a Usage>) -> Usage {
        let mut total = Usage::default();
        for item in items {
            total.add(item);
        }
        total
    }
}
