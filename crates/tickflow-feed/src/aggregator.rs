//! Digit statistics over a sliding window of ticks.

use serde::Serialize;
use std::collections::VecDeque;
use tickflow_core::Tick;

/// Point-in-time view of the digit distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigitSnapshot {
    /// Occurrences of each digit 0-9 in the window.
    pub counts: [u32; 10],
    pub window_len: usize,
    pub capacity: usize,
    /// Digits 0-4.
    pub low_sum: u32,
    /// Digits 5-9.
    pub high_sum: u32,
    pub even_sum: u32,
    pub odd_sum: u32,
    /// Share of each digit, in percent of `window_len`.
    pub percentages: [f64; 10],
    pub low_pct: f64,
    pub high_pct: f64,
    pub even_pct: f64,
    pub odd_pct: f64,
    pub last_digit: Option<u8>,
}

impl DigitSnapshot {
    /// Whether the window has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.window_len == self.capacity
    }
}

/// Fixed-capacity ring buffer of ticks with incremental digit counts.
#[derive(Debug, Clone)]
pub struct DigitAggregator {
    capacity: usize,
    window: VecDeque<Tick>,
    counts: [u32; 10],
}

impl DigitAggregator {
    /// Create an aggregator holding at most `capacity` ticks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
            counts: [0; 10],
        }
    }

    /// Add a tick, evicting the oldest one once the window is full.
    pub fn push(&mut self, tick: Tick) -> Option<Tick> {
        let evicted = if self.window.len() == self.capacity {
            self.window.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            let slot = &mut self.counts[usize::from(old.digit % 10)];
            *slot = slot.saturating_sub(1);
        }

        self.counts[usize::from(tick.digit % 10)] += 1;
        self.window.push_back(tick);
        evicted
    }

    /// Current statistics.
    pub fn snapshot(&self) -> DigitSnapshot {
        let window_len = self.window.len();
        let pct = |n: u32| {
            if window_len == 0 {
                0.0
            } else {
                f64::from(n) * 100.0 / window_len as f64
            }
        };

        let low_sum: u32 = self.counts[..5].iter().sum();
        let high_sum: u32 = self.counts[5..].iter().sum();
        let even_sum: u32 = self.counts.iter().step_by(2).sum();
        let odd_sum: u32 = self.counts.iter().skip(1).step_by(2).sum();

        let mut percentages = [0.0; 10];
        for (out, &count) in percentages.iter_mut().zip(self.counts.iter()) {
            *out = pct(count);
        }

        DigitSnapshot {
            counts: self.counts,
            window_len,
            capacity: self.capacity,
            low_sum,
            high_sum,
            even_sum,
            odd_sum,
            percentages,
            low_pct: pct(low_sum),
            high_pct: pct(high_sum),
            even_pct: pct(even_sum),
            odd_pct: pct(odd_sum),
            last_digit: self.window.back().map(|t| t.digit),
        }
    }

    /// Ticks in the window, oldest first.
    pub fn ticks(&self) -> Vec<Tick> {
        self.window.iter().cloned().collect()
    }

    /// Most recent tick.
    pub fn latest(&self) -> Option<&Tick> {
        self.window.back()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all ticks.
    pub fn clear(&mut self) {
        self.window.clear();
        self.counts = [0; 10];
    }
}
