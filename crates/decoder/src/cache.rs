//! Video frame cache — one decode session per source with a two-slot window.
//!
//! ```text
//!                 ┌──────────── VideoFrameCache ────────────┐
//!  get_frame_at ─►│ current: Slot   next: Empty|Pending|Ready│
//!                 │        │                 ▲               │
//!                 │        ▼                 │ prefetch thread
//!                 │  session (container + frame decoder)     │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! A request resolves `t` to a sample through the sample table, then:
//! - **hit**: the sample is in `current`; no decode.
//! - **sequential hit**: the sample is in `next` (or being prefetched into
//!   it); promote it to `current` and prefetch the following sample.
//! - **miss**: cancel the prefetch, replay the GOP up to the sample, store it
//!   in `current` and prefetch the following sample.
//!
//! Every request takes a new ticket from the request [`Generation`]; a decode
//! whose ticket went stale returns [`DecodeError::Cancelled`] and publishes
//! nothing. A failed decode also leaves both slots as they were.
//!
//! Lock order is `session` before `slots`, never the reverse.

use std::sync::Arc;

use cl_common::{DecodeError, Generation, SourceId, Ticket, TimeMs, VideoFrame};
use cl_demux::SampleTable;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::prefetch::{self, PrefetchStats, StatCounters};
use crate::session::{DecodeSession, SessionFactory};

/// Lifecycle of a cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Clone, Debug)]
pub(crate) struct Slot {
    /// Decode-order index of the sample.
    pub(crate) sample: usize,
    pub(crate) frame: VideoFrame,
}

#[derive(Clone, Debug)]
pub(crate) enum NextSlot {
    Empty,
    /// A prefetch thread holding this prefetch generation is decoding it.
    Pending { sample: usize, generation: u64 },
    Ready(Slot),
}

pub(crate) struct Slots {
    state: DecoderState,
    table: Option<Arc<SampleTable>>,
    current: Option<Slot>,
    pub(crate) next: NextSlot,
}

/// State shared between the cache and its prefetch threads.
pub(crate) struct Shared {
    pub(crate) source_id: SourceId,
    pub(crate) slots: Mutex<Slots>,
    pub(crate) next_changed: Condvar,
    pub(crate) session: Mutex<Option<DecodeSession>>,
    requests: Generation,
    prefetches: Generation,
    pub(crate) stats: StatCounters,
}

/// Frame cache for one video source.
pub struct VideoFrameCache {
    shared: Arc<Shared>,
    factory: Arc<dyn SessionFactory>,
    prefetch: bool,
}

impl std::fmt::Debug for VideoFrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrameCache")
            .field("source_id", &self.shared.source_id)
            .field("state", &self.state())
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

/// A claimed, not yet served frame request. See [`VideoFrameCache::request`].
#[derive(Debug)]
pub struct FrameRequest {
    cache: Arc<VideoFrameCache>,
    t: TimeMs,
    ticket: Ticket,
}

impl FrameRequest {
    /// Requested time, in milliseconds into the source.
    pub fn time(&self) -> TimeMs {
        self.t
    }

    /// Source of the cache this request was claimed on.
    pub fn source_id(&self) -> &SourceId {
        self.cache.source_id()
    }

    /// Whether a later request on the same cache has been claimed.
    pub fn is_superseded(&self) -> bool {
        !self.ticket.is_current()
    }

    /// Serve the request, blocking until its frame is decoded.
    pub fn wait(self) -> Result<VideoFrame, DecodeError> {
        self.cache.finish(self.t, &self.ticket)
    }
}

/// Several frames of one cache claimed under a single ticket and served in
/// order. See [`VideoFrameCache::request_batch`].
#[derive(Debug)]
pub struct FrameBatch {
    cache: Arc<VideoFrameCache>,
    times: Vec<TimeMs>,
    ticket: Ticket,
}

impl FrameBatch {
    /// Requested times, in serving order.
    pub fn times(&self) -> &[TimeMs] {
        &self.times
    }

    /// Source of the cache this batch was claimed on.
    pub fn source_id(&self) -> &SourceId {
        self.cache.source_id()
    }

    /// Whether a later request on the same cache has been claimed.
    pub fn is_superseded(&self) -> bool {
        !self.ticket.is_current()
    }

    /// Serve every time in order. Once a later claim supersedes the batch,
    /// the remaining entries resolve to [`DecodeError::Cancelled`].
    pub fn wait(self) -> Vec<Result<VideoFrame, DecodeError>> {
        self.times
            .iter()
            .map(|&t| self.cache.finish(t, &self.ticket))
            .collect()
    }
}

impl VideoFrameCache {
    /// Create an uninitialized cache; nothing is opened until the first request.
    pub fn new(source_id: SourceId, factory: Arc<dyn SessionFactory>, prefetch: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                source_id,
                slots: Mutex::new(Slots {
                    state: DecoderState::Uninitialized,
                    table: None,
                    current: None,
                    next: NextSlot::Empty,
                }),
                next_changed: Condvar::new(),
                session: Mutex::new(None),
                requests: Generation::new(),
                prefetches: Generation::new(),
                stats: StatCounters::default(),
            }),
            factory,
            prefetch,
        }
    }

    /// The source this cache decodes.
    pub fn source_id(&self) -> &SourceId {
        &self.shared.source_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DecoderState {
        self.shared.slots.lock().state
    }

    /// Snapshot of the hit, miss and decode counters.
    pub fn stats(&self) -> PrefetchStats {
        self.shared.stats.snapshot()
    }

    /// Generation of the most recent request.
    pub fn request_generation(&self) -> u64 {
        self.shared.requests.current()
    }

    /// The frame displayed at `t` (milliseconds into the source).
    ///
    /// Returns [`DecodeError::Cancelled`] when a later request on this cache
    /// superseded this one before it completed.
    pub fn get_frame_at(&self, t: TimeMs) -> Result<VideoFrame, DecodeError> {
        let ticket = self.claim();
        self.finish(t, &ticket)
    }

    /// Claim a request for `t` now and serve it later, typically on another
    /// thread. Requests supersede each other in the order they are claimed,
    /// not the order they are served.
    pub fn request(cache: &Arc<Self>, t: TimeMs) -> FrameRequest {
        FrameRequest {
            ticket: cache.claim(),
            cache: Arc::clone(cache),
            t,
        }
    }

    /// Claim one request covering every time in `times`, e.g. several
    /// timeline nodes showing this source. The batch supersedes earlier
    /// claims as a whole; its own entries never supersede each other.
    pub fn request_batch(cache: &Arc<Self>, times: Vec<TimeMs>) -> FrameBatch {
        FrameBatch {
            ticket: cache.claim(),
            cache: Arc::clone(cache),
            times,
        }
    }

    fn claim(&self) -> Ticket {
        let ticket = self.shared.requests.next();
        // Wake requests waiting on a prefetch so they notice they lost.
        let _slots = self.shared.slots.lock();
        self.shared.next_changed.notify_all();
        ticket
    }

    fn finish(&self, t: TimeMs, ticket: &Ticket) -> Result<VideoFrame, DecodeError> {
        let result = self.serve(t, ticket);
        if let Err(DecodeError::Cancelled) = &result {
            self.shared.stats.record_cancelled();
            debug!(source = %self.shared.source_id, t = %t, "Frame request superseded");
        }
        result
    }

    fn serve(&self, t: TimeMs, ticket: &Ticket) -> Result<VideoFrame, DecodeError> {
        // A superseded or disposed request must not reopen the asset.
        ticket.check()?;
        let table = self.ensure_ready()?;
        ticket.check()?;

        let target = table
            .find_sample_at(t)
            .ok_or_else(|| DecodeError::failed(&self.shared.source_id, "track has no samples"))?;

        {
            let mut slots = self.shared.slots.lock();
            loop {
                ticket.check()?;

                if let Some(current) = slots.current.as_ref().filter(|c| c.sample == target) {
                    self.shared.stats.record_hit();
                    trace!(source = %self.shared.source_id, sample = target, "Frame cache hit");
                    return Ok(current.frame.clone());
                }

                let promote = matches!(&slots.next, NextSlot::Ready(slot) if slot.sample == target);
                let in_flight = matches!(
                    &slots.next,
                    NextSlot::Pending { sample, .. } if *sample == target
                );

                if promote {
                    if let NextSlot::Ready(slot) = std::mem::replace(&mut slots.next, NextSlot::Empty) {
                        let frame = slot.frame.clone();
                        slots.current = Some(slot);
                        self.shared.stats.record_sequential_hit();
                        trace!(source = %self.shared.source_id, sample = target, "Promoted next frame");
                        self.start_prefetch(&mut slots, target, &table);
                        return Ok(frame);
                    }
                } else if in_flight {
                    self.shared.next_changed.wait(&mut slots);
                } else {
                    break;
                }
            }
        }

        self.seek(target, &table, ticket)
    }

    fn seek(
        &self,
        target: usize,
        table: &SampleTable,
        ticket: &Ticket,
    ) -> Result<VideoFrame, DecodeError> {
        self.shared.stats.record_miss();
        // Stop any in-flight prefetch before waiting for the session.
        self.shared.prefetches.next();

        let mut session = self.shared.session.lock();
        ticket.check()?;
        let session = session
            .as_mut()
            .ok_or_else(|| DecodeError::failed(&self.shared.source_id, "decoder was disposed"))?;

        let frame = match session.decode_through(
            &self.shared.source_id,
            target,
            ticket,
            &self.shared.stats,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(source = %self.shared.source_id, sample = target, error = %e, "Frame decode failed");
                }
                return Err(e);
            }
        };

        let mut slots = self.shared.slots.lock();
        ticket.check()?;
        slots.current = Some(Slot {
            sample: target,
            frame: frame.clone(),
        });
        slots.next = NextSlot::Empty;
        debug!(source = %self.shared.source_id, sample = target, "Seek complete");
        self.start_prefetch(&mut slots, target, table);
        self.shared.next_changed.notify_all();
        Ok(frame)
    }

    /// Mark `next` pending for the sample after `after` and spawn its worker.
    fn start_prefetch(&self, slots: &mut Slots, after: usize, table: &SampleTable) {
        if !self.prefetch {
            return;
        }
        let Some(sample) = table.next_in_presentation(after) else {
            return;
        };

        let ticket = self.shared.prefetches.next();
        slots.next = NextSlot::Pending {
            sample,
            generation: ticket.generation(),
        };

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("prefetch-{}", self.shared.source_id))
            .spawn(move || prefetch::run(shared, sample, ticket));
        if let Err(e) = spawned {
            warn!(source = %self.shared.source_id, error = %e, "Failed to spawn prefetch thread");
            slots.next = NextSlot::Empty;
        }
    }

    /// Open the session on first use.
    fn ensure_ready(&self) -> Result<Arc<SampleTable>, DecodeError> {
        if let Some(table) = self.shared.slots.lock().table.clone() {
            return Ok(table);
        }

        let mut session = self.shared.session.lock();
        {
            let mut slots = self.shared.slots.lock();
            if let Some(table) = slots.table.clone() {
                return Ok(table);
            }
            slots.state = DecoderState::Initializing;
        }

        match self.factory.open(&self.shared.source_id) {
            Ok(opened) => {
                let table = Arc::new(opened.container().sample_table().clone());
                info!(
                    source = %self.shared.source_id,
                    samples = table.len(),
                    resolution = %opened.track_info().resolution,
                    "Frame cache ready"
                );
                *session = Some(opened);
                let mut slots = self.shared.slots.lock();
                slots.table = Some(Arc::clone(&table));
                slots.state = DecoderState::Ready;
                Ok(table)
            }
            Err(e) => {
                warn!(source = %self.shared.source_id, error = %e, "Failed to open source");
                self.shared.slots.lock().state = DecoderState::Uninitialized;
                Err(e)
            }
        }
    }

    /// Block until no prefetch is in flight.
    pub fn settle(&self) {
        let mut slots = self.shared.slots.lock();
        while matches!(slots.next, NextSlot::Pending { .. }) {
            self.shared.next_changed.wait(&mut slots);
        }
    }

    /// Cancel all work, close the session and return to `Uninitialized`.
    pub fn dispose(&self) {
        self.shared.requests.next();
        self.shared.prefetches.next();
        let mut session = self.shared.session.lock();
        *session = None;
        let mut slots = self.shared.slots.lock();
        slots.state = DecoderState::Uninitialized;
        slots.table = None;
        slots.current = None;
        slots.next = NextSlot::Empty;
        self.shared.next_changed.notify_all();
        debug!(source = %self.shared.source_id, "Frame cache disposed");
    }
}

impl Drop for VideoFrameCache {
    fn drop(&mut self) {
        // Prefetch threads hold the shared state; make them stop early.
        self.shared.requests.next();
        self.shared.prefetches.next();
    }
}
