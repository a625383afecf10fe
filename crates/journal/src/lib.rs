// Path: crates/journal/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Append-only record of path-level mutations observed by dispatcher-driven
//! inode writes. Higher layers read deltas as a sequence range or as a live
//! subscription instead of scanning the tree.
//!
//! The journal is logically single-writer (the dispatcher appends after
//! each successful mutation) and many-reader. A bounded in-memory ring
//! holds recent deltas; once a delta falls off the ring, late range readers
//! see a truncation marker instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use canopy_types::path::RepoPath;

/// What a delta records about one observed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaKind {
    /// A new entry appeared at the path.
    Created(RepoPath),
    /// The entry at the path was removed.
    Removed(RepoPath),
    /// The contents or attributes at the path changed.
    Changed(RepoPath),
    /// An entry moved between paths.
    Renamed {
        /// The path the entry moved from.
        from: RepoPath,
        /// The path the entry moved to.
        to: RepoPath,
    },
}

impl DeltaKind {
    /// The paths this delta touches, source first for renames.
    pub fn paths(&self) -> Vec<&RepoPath> {
        match self {
            DeltaKind::Created(p) | DeltaKind::Removed(p) | DeltaKind::Changed(p) => vec![p],
            DeltaKind::Renamed { from, to } => vec![from, to],
        }
    }
}

/// One journal record describing a single observed filesystem mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Strictly monotonic sequence number, starting at 1.
    pub seq: u64,
    /// When the mutation was journaled.
    pub time: SystemTime,
    /// The mutation itself.
    pub kind: DeltaKind,
}

/// The result of a range read: the retained deltas plus, if the range
/// reaches below the ring, the highest truncated sequence number.
#[derive(Debug, Clone)]
pub struct DeltaRange {
    /// Retained deltas in sequence order.
    pub deltas: Vec<Arc<Delta>>,
    /// `Some(n)` when deltas up to and including `n` have been truncated
    /// out of the ring and the requested range started at or below `n`.
    pub truncated_past: Option<u64>,
}

struct JournalInner {
    ring: VecDeque<Arc<Delta>>,
    next_seq: u64,
    /// Highest sequence number dropped from the ring; 0 when nothing has
    /// been truncated yet.
    truncated: u64,
}

/// The per-mount journal.
pub struct Journal {
    inner: Mutex<JournalInner>,
    capacity: usize,
    live: broadcast::Sender<Arc<Delta>>,
}

impl Journal {
    /// Default ring capacity.
    pub const DEFAULT_CAPACITY: usize = 100_000;

    /// Creates a journal retaining up to `capacity` deltas in memory.
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(16));
        Journal {
            inner: Mutex::new(JournalInner {
                ring: VecDeque::new(),
                next_seq: 1,
                truncated: 0,
            }),
            capacity: capacity.max(1),
            live,
        }
    }

    /// Appends one delta and returns its sequence number.
    pub fn record(&self, kind: DeltaKind) -> u64 {
        let delta = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let delta = Arc::new(Delta {
                seq,
                time: SystemTime::now(),
                kind,
            });
            inner.ring.push_back(Arc::clone(&delta));
            while inner.ring.len() > self.capacity {
                if let Some(dropped) = inner.ring.pop_front() {
                    inner.truncated = dropped.seq;
                }
            }
            delta
        };
        trace!(seq = delta.seq, "journal delta recorded");
        // Nobody listening is fine.
        let _ = self.live.send(Arc::clone(&delta));
        delta.seq
    }

    /// The most recently assigned sequence number, 0 before any append.
    pub fn latest_seq(&self) -> u64 {
        self.inner.lock().next_seq - 1
    }

    /// Reads the retained deltas with sequence numbers in `[from, to]`,
    /// reporting truncation when `from` reaches below the ring.
    pub fn delta_range(&self, from: u64, to: u64) -> DeltaRange {
        let inner = self.inner.lock();
        let deltas = inner
            .ring
            .iter()
            .filter(|d| d.seq >= from && d.seq <= to)
            .cloned()
            .collect();
        let truncated_past = if inner.truncated > 0 && from <= inner.truncated {
            Some(inner.truncated)
        } else {
            None
        };
        DeltaRange {
            deltas,
            truncated_past,
        }
    }

    /// Subscribes to deltas appended after this call. Delivery within the
    /// subscription is gap-free in sequence order while the subscriber
    /// keeps up with the ring capacity.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Delta>> {
        self.live.subscribe()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Journal::new(Self::DEFAULT_CAPACITY)
    }
}
