//! Flow mode: all tracks of a session served as one continuous stream.
//!
//! The renderer then sees a single, ever-growing "track", so track changes
//! have to be derived from the playback position. Each track appended to the
//! stream adds a boundary at its cumulative end position. Once the position
//! reaches the oldest outstanding boundary, the next track has become
//! audible.

use std::collections::{HashSet, VecDeque};

use crate::track::TrackInfo;

/// Cumulative track boundaries of a flow stream, in milliseconds.
///
/// New boundaries go on top. The boundary to cross next is the oldest one
/// still held.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowMarkers {
    boundaries: VecDeque<u32>,
}

impl FlowMarkers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, boundary: u32) {
        self.boundaries.push_front(boundary);
    }

    /// Appends a track of `duration` after the most recent boundary.
    pub fn extend(&mut self, duration: u32) {
        let end = self.latest().unwrap_or(0).saturating_add(duration);
        self.push(end);
    }

    /// The most recently added boundary.
    #[must_use]
    pub fn latest(&self) -> Option<u32> {
        self.boundaries.front().copied()
    }

    /// The boundary the stream crosses next.
    #[must_use]
    pub fn next_boundary(&self) -> Option<u32> {
        self.boundaries.back().copied()
    }

    /// Drops the next boundary once crossed.
    pub fn cross(&mut self) -> Option<u32> {
        self.boundaries.pop_back()
    }

    /// Whether `position` crossed a boundary with another track queued
    /// behind it.
    ///
    /// The last boundary is the end of the whole stream, not a transition.
    #[must_use]
    pub fn is_crossed_at(&self, position: u32) -> bool {
        self.boundaries.len() > 1 && self.next_boundary().is_some_and(|next| position >= next)
    }

    pub fn clear(&mut self) {
        self.boundaries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }
}

/// Per-session flow bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct FlowState {
    pub markers: FlowMarkers,

    /// Track ids appended since the last reset. Seeing one again means the
    /// remote queue looped.
    pub played: HashSet<String>,

    /// Metadata of the track the remote side reports as current.
    pub track_info: Option<TrackInfo>,
}

impl FlowState {
    /// Forgets all boundaries and played tracks. The cached track info is
    /// kept.
    pub fn reset(&mut self) {
        self.markers.clear();
        self.played.clear();
    }

    /// Records the first track of a new flow stream.
    pub fn start(&mut self, track_id: &str, duration: u32) {
        self.markers.push(duration);
        self.played.insert(track_id.to_owned());
    }

    /// Appends a track to a running flow stream.
    ///
    /// A track that was already played since the last reset restarts the
    /// bookkeeping at its own duration. Returns `true` in that case.
    pub fn append(&mut self, track_id: &str, duration: u32) -> bool {
        let looped = self.played.contains(track_id);
        if looped {
            self.reset();
            self.markers.push(duration);
        } else {
            self.markers.extend(duration);
        }

        self.played.insert(track_id.to_owned());
        looped
    }
}
