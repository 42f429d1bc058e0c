//! Sample Buffer
//!
//! Time-ordered readings for the current collection window.

use crate::types::Sample;

/// Where an incoming sample landed in the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Newer than everything held so far
    Appended,
    /// Same timestamp as the newest sample, which it replaced
    ReplacedLatest,
    /// Older than the newest sample; inserted (or replaced) in order
    Backfilled,
}

impl Placement {
    /// Whether the sample continues the live stream (as opposed to a late arrival)
    pub fn is_live(&self) -> bool {
        !matches!(self, Placement::Backfilled)
    }
}

/// Ordered, deduplicated readings for one day
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: Vec<Sample>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample, keeping timestamp order
    ///
    /// A sample with the same timestamp as a held one replaces it.
    pub fn push(&mut self, sample: Sample) -> Placement {
        let Some(last) = self.samples.last() else {
            self.samples.push(sample);
            return Placement::Appended;
        };

        if sample.timestamp > last.timestamp {
            self.samples.push(sample);
            return Placement::Appended;
        }

        if sample.timestamp == last.timestamp {
            let idx = self.samples.len() - 1;
            self.samples[idx] = sample;
            return Placement::ReplacedLatest;
        }

        match self
            .samples
            .binary_search_by(|s| s.timestamp.cmp(&sample.timestamp))
        {
            Ok(idx) => self.samples[idx] = sample,
            Err(idx) => self.samples.insert(idx, sample),
        }
        Placement::Backfilled
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
