//! Streamers and the queue of streamers a session keeps in flight.
//!
//! A streamer serves one HTTP audio stream to the renderer. The transport
//! itself lives outside this crate, behind the [`Streamer`] and
//! [`StreamerFactory`] traits.
//!
//! UPnP renderers accept one "next" URI besides the current one, so a session
//! never needs more than two streamers: the one being played and the one
//! prefetched for the next track. [`StreamerQueue`] enforces that bound.

use std::{collections::VecDeque, fmt, net::IpAddr, sync::Arc};

use crate::{
    audio::{CacheMode, ContentLength},
    error::Result,
    track::{Metadata, StartOffset, TrackInfo},
};

/// Lifecycle of a streamer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum StreamerState {
    /// Accepting audio data.
    #[default]
    Active,

    /// Serving what is already buffered, accepting nothing more.
    Draining,
}

/// One in-flight audio delivery for a single track.
///
/// Implementations are shared between the session, which feeds them, and
/// the HTTP transport, which serves them; all methods take `&self`.
pub trait Streamer: Send + Sync {
    /// Starts serving.
    fn start(&self);

    /// Drops buffered data, e.g. before restarting at another position.
    fn flush(&self);

    /// Feeds raw audio and returns how many bytes were accepted.
    fn feed(&self, data: &[u8]) -> usize;

    fn offset(&self) -> StartOffset;
    fn set_offset(&self, offset: StartOffset);

    /// Metadata with the raw track duration and the content length.
    fn metadata(&self) -> Metadata;

    fn set_content_length(&self, content_length: ContentLength);

    /// URL the renderer pulls this stream from.
    fn stream_url(&self) -> String;

    /// Short identifier for logging.
    fn stream_id(&self) -> String;

    /// Key of the queue entry this streamer was created for.
    fn track_key(&self) -> String;

    fn track_info(&self) -> TrackInfo;
    fn set_track_info(&self, info: TrackInfo);

    fn set_state(&self, state: StreamerState);
}

/// Everything needed to create a streamer.
#[derive(Clone, Debug)]
pub struct StreamerParams {
    pub address: IpAddr,
    pub device_id: String,

    /// Running index of streamers created by the session.
    pub index: u32,

    pub codec: String,
    pub flow: bool,
    pub content_length: ContentLength,
    pub cache_mode: CacheMode,
    pub track_info: TrackInfo,
    pub track_key: String,
    pub offset: StartOffset,
}

/// Creates streamers for a session.
pub trait StreamerFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the stream cannot be set up, e.g. when no port is
    /// available.
    fn create(&self, params: StreamerParams) -> Result<Arc<dyn Streamer>>;
}

/// Bounded queue of streamers.
///
/// The front holds the most recently created streamer, the back the one the
/// renderer consumes.
#[derive(Clone, Default)]
pub struct StreamerQueue {
    streamers: VecDeque<Arc<dyn Streamer>>,
}

impl StreamerQueue {
    /// Current stream plus one prefetched next stream.
    pub const CAPACITY: usize = 2;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a new streamer to the front.
    ///
    /// # Errors
    ///
    /// Hands the streamer back when the queue is full.
    pub fn push_front(&mut self, streamer: Arc<dyn Streamer>) -> std::result::Result<(), Arc<dyn Streamer>> {
        if self.is_full() {
            return Err(streamer);
        }
        self.streamers.push_front(streamer);
        Ok(())
    }

    #[must_use]
    pub fn front(&self) -> Option<&Arc<dyn Streamer>> {
        self.streamers.front()
    }

    #[must_use]
    pub fn back(&self) -> Option<&Arc<dyn Streamer>> {
        self.streamers.back()
    }

    /// Replaces the whole queue with a single streamer.
    pub fn reset_to(&mut self, streamer: Arc<dyn Streamer>) {
        self.streamers.clear();
        self.streamers.push_front(streamer);
    }

    pub fn pop_back(&mut self) -> Option<Arc<dyn Streamer>> {
        self.streamers.pop_back()
    }

    pub fn clear(&mut self) {
        self.streamers.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streamers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streamers.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.streamers.len() >= Self::CAPACITY
    }

    /// The queued streamer serving exactly this URL.
    #[must_use]
    pub fn find_by_url(&self, url: &str) -> Option<&Arc<dyn Streamer>> {
        self.streamers
            .iter()
            .find(|streamer| streamer.stream_url() == url)
    }
}

impl fmt::Debug for StreamerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.streamers.iter().map(|streamer| streamer.stream_id()))
            .finish()
    }
}
