//! Events flowing into a player session.
//!
//! Two independent sources drive a session:
//! * the control channel, which delivers [`Event`]s from its protocol pump
//! * the renderer, which reports [`ShadowEvent`]s while holding the shared
//!   lock
//!
//! # Example
//!
//! ```rust
//! use shadowcast::events::{Event, ShadowEvent};
//!
//! fn describe(event: &Event) -> &'static str {
//!     match event {
//!         Event::PlaybackStart(_) => "new playback session",
//!         Event::Seek(_) => "seek",
//!         _ => "other",
//!     }
//! }
//!
//! assert_eq!(describe(&Event::Seek(45_000)), "seek");
//! assert_eq!(ShadowEvent::Time(1_000), ShadowEvent::Time(1_000));
//! ```

use crate::track::TrackInfo;

/// Control events as delivered by the control channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A new playback session starts. The first track begins at the given
    /// position in milliseconds.
    PlaybackStart(u32),

    /// Pause (`true`) or resume (`false`).
    PlayPause(bool),

    /// The queue is being replaced.
    Flush,

    Next,
    Prev,

    /// The remote client released this device.
    Disconnect,

    /// Seek to the given position in milliseconds.
    Seek(u32),

    /// No track left to play.
    Depleted,

    Volume(u16),

    /// Metadata of the track that just started on the remote side.
    TrackInfo(TrackInfo),
}

/// Feedback from the renderer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShadowEvent {
    /// Playback position in milliseconds, on the renderer's own clock and on
    /// the timeline of the stream being played.
    ///
    /// Stream-relative renderers restart at 0 after every load, including
    /// the reload of a seek: after seeking to 45000 they report 0, and the
    /// player maps that back to 45000 on the track. Renderers that report
    /// track positions instead must say so through
    /// [`ShadowSink::uses_start_position`](crate::shadow::ShadowSink::uses_start_position).
    Time(u32),

    /// The renderer started pulling from another URL.
    TrackChanged(String),

    Play,
    Pause,
    Stop,
    Volume(u16),
}
