//! Typed event bus for bot instances.
//!
//! Each `BotInstance` publishes to its own broadcast channel; the registry
//! re-broadcasts onto a global stream with the user identity attached.
//! Broadcast semantics isolate subscribers from each other: a slow or
//! dropped receiver lags or misses messages without blocking the sender
//! or other subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::{Direction, Opportunity, Symbol};

/// Maximum entries kept in a bot's rolling log buffer
pub const LOG_BUFFER_CAPACITY: usize = 500;

/// Severity attached to log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One entry in the rolling per-user log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Payload of a trade event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: Symbol,
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub order_id: String,
}

/// Payload of an analysis-complete event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub tick: u64,
    pub opportunity_count: usize,
}

/// Domain events emitted by a bot instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BotEvent {
    Log {
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: String,
    },
    Signal {
        timestamp: DateTime<Utc>,
        opportunity: Opportunity,
    },
    Trade {
        timestamp: DateTime<Utc>,
        trade: TradeEvent,
    },
    Analysis {
        timestamp: DateTime<Utc>,
        analysis: AnalysisEvent,
    },
}

impl BotEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        BotEvent::Log {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    pub fn signal(opportunity: Opportunity) -> Self {
        BotEvent::Signal {
            timestamp: Utc::now(),
            opportunity,
        }
    }

    pub fn trade(trade: TradeEvent) -> Self {
        BotEvent::Trade {
            timestamp: Utc::now(),
            trade,
        }
    }

    pub fn analysis(tick: u64, opportunity_count: usize) -> Self {
        BotEvent::Analysis {
            timestamp: Utc::now(),
            analysis: AnalysisEvent {
                tick,
                opportunity_count,
            },
        }
    }
}

/// A bot event tagged with its originating user, as seen on the registry's
/// global stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEvent {
    pub user_id: String,
    #[serde(flatten)]
    pub event: BotEvent,
}

/// Bounded rolling log; oldest entries are evicted first
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_BUFFER_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        LogBuffer {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    /// Most recent `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_evicts_oldest() {
        let mut buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(LogLevel::Info, format!("entry {}", i));
        }

        assert_eq!(buffer.len(), 3);
        let tail = buffer.tail(10);
        assert_eq!(tail[0].message, "entry 2");
        assert_eq!(tail[2].message, "entry 4");
    }

    #[test]
    fn test_log_buffer_tail_limit() {
        let mut buffer = LogBuffer::new(10);
        for i in 0..6 {
            buffer.push(LogLevel::Warn, format!("entry {}", i));
        }

        let tail = buffer.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "entry 4");
        assert_eq!(tail[1].message, "entry 5");
    }

    #[test]
    fn test_event_constructors_stamp_time() {
        let event = BotEvent::analysis(7, 2);
        match event {
            BotEvent::Analysis { analysis, .. } => {
                assert_eq!(analysis.tick, 7);
                assert_eq!(analysis.opportunity_count, 2);
            }
            _ => panic!("expected analysis event"),
        }
    }
}
