//! Sliding time windows

use smogwatch_core::EventRecord;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::rule::{Aggregate, AggregateFunction};

/// Events received within the last `span`, oldest first
pub struct SlidingWindow {
    span: Duration,
    entries: VecDeque<(Instant, EventRecord)>,
}

impl SlidingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: Instant, record: EventRecord) {
        self.entries.push_back((at, record));
        self.evict(at);
    }

    /// Drop entries that are `span` or more older than `now`
    pub fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.entries.front() {
            if now.saturating_duration_since(*at) >= self.span {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Compute an aggregate over the retained entries
    pub fn aggregate(&self, aggregate: &Aggregate) -> Option<f64> {
        if aggregate.function == AggregateFunction::Count {
            return Some(self.entries.len() as f64);
        }

        let values = self
            .entries
            .iter()
            .filter_map(|(_, record)| record.get(&aggregate.field).and_then(|v| v.as_f64()));

        match aggregate.function {
            AggregateFunction::Avg => {
                let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                (count > 0).then(|| sum / count as f64)
            }
            AggregateFunction::Sum => Some(values.sum()),
            AggregateFunction::Min => values.reduce(f64::min),
            AggregateFunction::Max => values.reduce(f64::max),
            AggregateFunction::Count => unreachable!("handled above"),
        }
    }

    /// Most recently pushed entry
    pub fn latest(&self) -> Option<&EventRecord> {
        self.entries.back().map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
