//! Cancellation primitives: cancel tokens and request generations.
//!
//! Cancellation is explicit and cooperative. Long-running work checks its
//! token or ticket at each suspension point (one encoded sample, one audio
//! packet) and bails out with [`DecodeError::Cancelled`].
//!
//! ```text
//!   Generation ──next()──► Ticket(gen=1)   superseded ──► Cancelled
//!              ──next()──► Ticket(gen=2)   current    ──► result kept
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DecodeError;

/// A shared cancellation flag, optionally chained to a parent.
///
/// Cancelling a parent cancels every child derived from it; cancelling a
/// child leaves the parent untouched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is cancelled.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::Acquire))
    }

    pub fn check(&self) -> Result<(), DecodeError> {
        if self.is_cancelled() {
            Err(DecodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Monotonic request counter implementing last-caller-wins.
///
/// Every new request takes a [`Ticket`] via [`next`](Self::next), which
/// invalidates all previously issued tickets.
#[derive(Clone, Debug, Default)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, superseding every outstanding ticket.
    pub fn next(&self) -> Ticket {
        let generation = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        Ticket {
            generation,
            counter: Arc::clone(&self.counter),
        }
    }

    /// A ticket for the current generation without superseding anything.
    pub fn current_ticket(&self) -> Ticket {
        Ticket {
            generation: self.current(),
            counter: Arc::clone(&self.counter),
        }
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }
}

/// Proof of membership in one generation.
#[derive(Clone, Debug)]
pub struct Ticket {
    generation: u64,
    counter: Arc<AtomicU64>,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::Acquire) == self.generation
    }

    pub fn check(&self) -> Result<(), DecodeError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(DecodeError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn child_follows_parent_only() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn newer_ticket_supersedes_older() {
        let generation = Generation::new();
        let first = generation.next();
        assert!(first.is_current());
        let second = generation.next();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(second.generation(), 2);
        assert!(first.check().is_err());
    }

    #[test]
    fn current_ticket_does_not_advance() {
        let generation = Generation::new();
        let issued = generation.next();
        let observer = generation.current_ticket();
        assert!(issued.is_current());
        assert!(observer.is_current());
        assert_eq!(generation.current(), 1);
    }
}
