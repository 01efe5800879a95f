//! The renderer side of a session: the shadow sink and the lock it shares
//! with the player.
//!
//! The renderer, e.g. a UPnP media renderer proxy, actually makes sound. It
//! receives commands through [`ShadowSink`] and reports back through
//! [`Player::notify`](crate::player::Player::notify).
//!
//! Renderer feedback and player commands must not interleave, so both sides
//! serialize on one [`SharedLock`]. The renderer creates it, hands a clone to
//! [`Player::create`](crate::player::Player::create) and takes it whenever it
//! reports an event. The lock owns all mutable session state; holding a
//! [`SharedGuard`] is the proof that it is taken.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Instant,
};

use crate::{
    flow::FlowState,
    streamer::{Streamer, StreamerQueue},
    track::Metadata,
};

/// Commands to the renderer.
///
/// Commands are issued while the shared lock is held. Implementations must
/// not take the [`SharedLock`] from within a command.
pub trait ShadowSink: Send + Sync {
    /// Loads a stream. `start_position` is the position in the track the
    /// stream starts at, in milliseconds; renderers may ignore it.
    fn load(&self, url: &str, metadata: &Metadata, start_position: u32);

    fn play(&self);
    fn pause(&self);
    fn stop(&self);
    fn volume(&self, volume: u16);

    /// Reusable credentials after a successful login, for the renderer to
    /// persist if it wants to.
    fn credentials(&self, json: &str);

    /// Whether the renderer honours the start position of
    /// [`load`](Self::load), reporting positions on the track's timeline
    /// instead of the stream's.
    fn uses_start_position(&self) -> bool {
        false
    }
}

/// Mutable state of one player session.
pub(crate) struct State {
    pub playlist_ended: bool,
    pub suppress_next_notify: bool,
    pub flushed: bool,
    pub volume: u16,

    /// Position the first track of a playback session starts at.
    pub start_offset: u32,

    pub last_position: Option<u32>,
    pub last_timestamp: Instant,

    /// Key of the track currently fed through the data callback.
    pub stream_track_key: String,

    pub queue: StreamerQueue,

    /// The streamer the renderer pulls from, as reported by the renderer.
    pub active: Option<Arc<dyn Streamer>>,

    pub flow: FlowState,

    /// Running index handed to new streamers.
    pub index: u32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            playlist_ended: false,
            suppress_next_notify: false,
            flushed: false,
            volume: 0,
            start_offset: 0,
            last_position: None,
            last_timestamp: Instant::now(),
            stream_track_key: String::new(),
            queue: StreamerQueue::new(),
            active: None,
            flow: FlowState::default(),
            index: 0,
        }
    }
}

impl State {
    pub fn has_streamer(&self) -> bool {
        self.active.is_some() || !self.queue.is_empty()
    }

    pub fn next_index(&mut self) -> u32 {
        let index = self.index;
        self.index = self.index.wrapping_add(1);
        index
    }
}

struct LockInner {
    state: Mutex<State>,
    bound: AtomicBool,
}

/// Lock shared between a renderer and the player it drives.
#[derive(Clone)]
pub struct SharedLock {
    inner: Arc<LockInner>,
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                state: Mutex::new(State::default()),
                bound: AtomicBool::new(false),
            }),
        }
    }

    /// Takes the lock, blocking until available.
    ///
    /// A poisoned lock is taken over: the state is always left consistent
    /// between sink commands.
    pub fn lock(&self) -> SharedGuard<'_> {
        SharedGuard {
            owner: &*self.inner,
            state: self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Whether the guard was taken from this lock.
    #[must_use]
    pub fn owns(&self, guard: &SharedGuard<'_>) -> bool {
        std::ptr::eq(&*self.inner, guard.owner)
    }

    /// Binds the lock to a player. Returns `false` if it is bound already.
    pub(crate) fn bind(&self) -> bool {
        self.inner
            .bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the lock from its player and clears the session state.
    pub(crate) fn unbind(&self) {
        *self.lock().state = State::default();
        self.inner.bound.store(false, Ordering::Release);
    }
}

/// Proof that the [`SharedLock`] is held. Released on drop.
pub struct SharedGuard<'a> {
    owner: &'a LockInner,
    pub(crate) state: MutexGuard<'a, State>,
}
