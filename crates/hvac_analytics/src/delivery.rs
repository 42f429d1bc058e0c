//! Delivery Queue
//!
//! Bounded FIFO of outbound transmissions. Items leave the queue only after
//! the transport confirms them, so a failed or cancelled drain never loses
//! data. When the queue is full the oldest item is dropped.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::aggregator::ReportEnvelope;
use crate::moving_average::RateHistoryEntry;
use crate::types::{Sample, WeatherReading};

// ─────────────────────────────────────────────────────────────────────────────
// Transmissions
// ─────────────────────────────────────────────────────────────────────────────

/// Raw readings sent in batches ahead of the daily report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleBatch {
    pub anonymous_id: String,
    pub readings: Vec<Sample>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub weather: Vec<WeatherReading>,
}

/// One unit of outbound data
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Transmission {
    SampleBatch(SampleBatch),
    DailyReport(ReportEnvelope),
}

impl Transmission {
    /// Backend endpoint this transmission is posted to
    pub fn endpoint(&self) -> &'static str {
        match self {
            Transmission::SampleBatch(_) => "sensor-data",
            Transmission::DailyReport(_) => "analytics-daily-report",
        }
    }

    pub fn anonymous_id(&self) -> &str {
        match self {
            Transmission::SampleBatch(batch) => &batch.anonymous_id,
            Transmission::DailyReport(envelope) => &envelope.report.anonymous_id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Backend acknowledgement, optionally carrying historical rates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    #[serde(default)]
    pub rate_history: Vec<RateHistoryEntry>,
}

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Delivered(BackendResponse),
    /// Temporary failure; the item stays queued
    Retriable(String),
    /// The backend will never accept this item
    Fatal(String),
}

/// Network seam used by [`DeliveryQueue::drain`]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, item: &Transmission) -> SendOutcome;
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// What a drain accomplished
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainSummary {
    pub delivered: usize,
    pub rejected: usize,
    pub remaining: usize,
    /// Rate history returned by the backend, in delivery order
    pub rate_history: Vec<RateHistoryEntry>,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub rejected: u64,
    pub delivered: u64,
}

#[derive(Debug)]
pub struct DeliveryQueue {
    items: VecDeque<Transmission>,
    capacity: usize,
    max_per_drain: usize,
    dropped: u64,
    rejected: u64,
    delivered: u64,
}

impl DeliveryQueue {
    pub fn new(capacity: usize, max_per_drain: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            max_per_drain: max_per_drain.max(1),
            dropped: 0,
            rejected: 0,
            delivered: 0,
        }
    }

    /// Queue an item, dropping the oldest one if full
    pub fn enqueue(&mut self, item: Transmission) {
        if self.items.len() >= self.capacity {
            if let Some(oldest) = self.items.pop_front() {
                self.dropped += 1;
                tracing::warn!(
                    endpoint = oldest.endpoint(),
                    anonymous_id = %oldest.anonymous_id(),
                    capacity = self.capacity,
                    dropped_total = self.dropped,
                    "Delivery queue full, dropped oldest transmission"
                );
            }
        }
        self.items.push_back(item);
    }

    /// Send queued items in order until the queue empties, the per-drain
    /// limit is hit, or the transport reports a retriable failure
    ///
    /// The head item is only removed once the transport has answered, so
    /// dropping this future part-way leaves the queue as it was.
    pub async fn drain(&mut self, transport: &dyn Transport) -> DrainSummary {
        let mut summary = DrainSummary::default();

        for _ in 0..self.max_per_drain {
            let Some(item) = self.items.front() else {
                break;
            };

            match transport.send(item).await {
                SendOutcome::Delivered(response) => {
                    self.items.pop_front();
                    self.delivered += 1;
                    summary.delivered += 1;
                    summary.rate_history.extend(response.rate_history);
                }
                SendOutcome::Retriable(reason) => {
                    tracing::warn!(
                        endpoint = item.endpoint(),
                        queued = self.items.len(),
                        %reason,
                        "Delivery failed, will retry"
                    );
                    break;
                }
                SendOutcome::Fatal(reason) => {
                    tracing::error!(
                        endpoint = item.endpoint(),
                        anonymous_id = %item.anonymous_id(),
                        %reason,
                        "Transmission rejected, dropping it"
                    );
                    self.items.pop_front();
                    self.rejected += 1;
                    summary.rejected += 1;
                }
            }
        }

        summary.remaining = self.items.len();
        if summary.delivered > 0 || summary.rejected > 0 {
            tracing::debug!(
                delivered = summary.delivered,
                rejected = summary.rejected,
                remaining = summary.remaining,
                "Drained delivery queue"
            );
        }
        summary
    }

    /// Discard everything queued
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        if cleared > 0 {
            tracing::info!(cleared, "Cleared delivery queue");
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transmission> {
        self.items.iter()
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            len: self.items.len(),
            capacity: self.capacity,
            dropped: self.dropped,
            rejected: self.rejected,
            delivered: self.delivered,
        }
    }
}
