use std::fmt;

use serde::{Deserialize, Serialize};

/// Audio format requested from the control channel.
///
/// Configured as a bitrate in kbps. Bitrates other than 96 and 320 fall back
/// to the 160 kbps default.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum AudioFormat {
    /// 96 kbps Ogg Vorbis
    OggVorbis96,

    /// 160 kbps Ogg Vorbis (default)
    #[default]
    OggVorbis160,

    /// 320 kbps Ogg Vorbis
    OggVorbis320,
}

impl AudioFormat {
    #[must_use]
    pub fn bitrate(self) -> u16 {
        match self {
            Self::OggVorbis96 => 96,
            Self::OggVorbis160 => 160,
            Self::OggVorbis320 => 320,
        }
    }
}

impl From<u16> for AudioFormat {
    fn from(bitrate: u16) -> Self {
        match bitrate {
            96 => Self::OggVorbis96,
            320 => Self::OggVorbis320,
            _ => Self::OggVorbis160,
        }
    }
}

impl From<AudioFormat> for u16 {
    fn from(format: AudioFormat) -> Self {
        format.bitrate()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ogg/vorbis {} kbps", self.bitrate())
    }
}

/// How a streamer advertises the length of its HTTP response.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentLength {
    /// No `Content-Length` header, the connection closes at the end.
    #[default]
    None,

    /// Chunked transfer encoding.
    Chunked,

    /// Estimated from the track's duration and bitrate.
    Real,

    /// A fixed, large value for renderers that insist on one.
    Fixed(u64),
}

impl ContentLength {
    /// The content length to use for a session.
    ///
    /// A flow stream spans many tracks, so a per-track estimate is
    /// meaningless there and is replaced by no header at all.
    #[must_use]
    pub fn for_session(self, flow: bool) -> Self {
        if flow && self == Self::Real {
            Self::None
        } else {
            self
        }
    }
}

/// Where streamers keep the audio they already served.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Memory,
    Disk,
}
