use std::fmt;

use serde::Serialize;

/// Track metadata as known to the control channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct TrackInfo {
    /// Stable identifier of the track itself. The same track queued twice
    /// has the same id but a different track key.
    pub track_id: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub image_url: String,

    /// Duration in milliseconds.
    pub duration: u32,
}

impl fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.track_id, self.artist, self.name)
    }
}

/// Metadata handed to the renderer when a stream is loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Metadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: String,

    /// Duration in milliseconds, as the renderer will perceive it.
    pub duration: u32,

    /// Length of the HTTP body in bytes, when known.
    pub content_length: Option<u64>,
}

impl Metadata {
    /// Renderers see a stream that starts at the offset, so its perceived
    /// duration is the track duration minus the skipped part.
    #[must_use]
    pub fn adjusted_by(mut self, offset: StartOffset) -> Self {
        self.duration = offset.shorten(self.duration);
        self
    }
}

impl From<&TrackInfo> for Metadata {
    fn from(info: &TrackInfo) -> Self {
        Self {
            title: info.name.clone(),
            artist: info.artist.clone(),
            album: info.album.clone(),
            artwork: info.image_url.clone(),
            duration: info.duration,
            content_length: None,
        }
    }
}

/// Where a stream starts relative to its track, in milliseconds.
///
/// Stored as the negative of the start position, so a stream starting
/// 45 seconds into its track has an offset of -45000. Positions reported on
/// the stream's own timeline convert back to the track's timeline by
/// subtracting the offset. The value is never positive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StartOffset(i64);

impl StartOffset {
    pub const ZERO: Self = Self(0);

    /// Offset of a stream that starts `position` milliseconds into its track.
    #[must_use]
    pub fn from_position(position: u32) -> Self {
        Self(-i64::from(position))
    }

    /// Position in the track at which the stream starts.
    #[must_use]
    pub fn position(self) -> u32 {
        u32::try_from(-self.0).unwrap_or(u32::MAX)
    }

    /// Converts a position on the stream's timeline to the track's timeline.
    #[must_use]
    pub fn to_track_position(self, stream_position: u32) -> u32 {
        stream_position.saturating_add(self.position())
    }

    /// Shortens a duration by the skipped part, saturating at zero.
    #[must_use]
    pub fn shorten(self, duration: u32) -> u32 {
        duration.saturating_sub(self.position())
    }
}

impl fmt::Display for StartOffset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ms", self.0)
    }
}
