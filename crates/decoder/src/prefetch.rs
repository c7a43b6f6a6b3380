//! Prefetch worker — decodes the frame after the one just served.
//!
//! After every hit that changes `current`, the cache marks the `next` slot
//! `Pending` and spawns a worker for the sample presented next. The worker
//! takes the session lock, decodes (usually a single sample, continuing the
//! GOP), and publishes into `next` only if its ticket is still current and
//! the slot is still pending under that ticket. A seek advances the
//! prefetch generation, so a stale worker stops at its next sample boundary
//! and clears its own pending slot.
//!
//! ```text
//!   get_frame_at(t) ──► current = N ──► next = Pending(N+1) ──► [prefetch thread]
//!                                                                    │ decode N+1
//!   get_frame_at(t') ◄── promote ◄── next = Ready(N+1) ◄─────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cl_common::{DecodeError, Ticket};
use tracing::{debug, warn};

use crate::cache::{NextSlot, Shared, Slot};

/// Lifetime counters of one cache.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    sequential_hits: AtomicU64,
    misses: AtomicU64,
    samples_decoded: AtomicU64,
    cancelled: AtomicU64,
}

impl StatCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sequential_hit(&self) {
        self.sequential_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decoded(&self) {
        self.samples_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PrefetchStats {
        PrefetchStats {
            hits: self.hits.load(Ordering::Relaxed),
            sequential_hits: self.sequential_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Aggregate statistics for a frame cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Requests served from `current` without decoding.
    pub hits: u64,
    /// Requests served by promoting `next`.
    pub sequential_hits: u64,
    /// Requests that needed a seek.
    pub misses: u64,
    /// Samples fed to the decoder, including prefetch work.
    pub samples_decoded: u64,
    /// Decodes abandoned because a newer request superseded them.
    pub cancelled: u64,
}

impl PrefetchStats {
    pub fn requests(&self) -> u64 {
        self.hits + self.sequential_hits + self.misses
    }

    /// Share of requests served without a seek (0.0–1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            (self.hits + self.sequential_hits) as f64 / total as f64
        }
    }
}

/// Body of a prefetch thread.
pub(crate) fn run(shared: Arc<Shared>, sample: usize, ticket: Ticket) {
    let result = {
        let mut session = shared.session.lock();
        match session.as_mut() {
            Some(session) if ticket.is_current() => {
                session.decode_through(&shared.source_id, sample, &ticket, &shared.stats)
            }
            _ => Err(DecodeError::Cancelled),
        }
    };

    let mut slots = shared.slots.lock();
    let owns_slot = matches!(
        slots.next,
        NextSlot::Pending { generation, .. } if generation == ticket.generation()
    );

    match result {
        Ok(frame) if owns_slot && ticket.is_current() => {
            debug!(source = %shared.source_id, sample, "Prefetched next frame");
            slots.next = NextSlot::Ready(Slot { sample, frame });
        }
        Ok(_) | Err(DecodeError::Cancelled) => {
            shared.stats.record_cancelled();
            debug!(source = %shared.source_id, sample, "Prefetch superseded");
            if owns_slot {
                slots.next = NextSlot::Empty;
            }
        }
        Err(e) => {
            warn!(source = %shared.source_id, sample, error = %e, "Prefetch failed");
            if owns_slot {
                slots.next = NextSlot::Empty;
            }
        }
    }
    shared.next_changed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_counts_sequential_hits() {
        let stats = PrefetchStats {
            hits: 1,
            sequential_hits: 2,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.requests(), 4);
        assert!((stats.hit_rate() - 0.75).abs() < 1e-12);
        assert_eq!(PrefetchStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn counters_snapshot() {
        let counters = StatCounters::default();
        counters.record_miss();
        counters.record_decoded();
        counters.record_decoded();
        counters.record_cancelled();
        let snap = counters.snapshot();
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.samples_decoded, 2);
        assert_eq!(snap.cancelled, 1);
    }
}
