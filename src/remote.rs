//! The remote side of a session: the cloud control channel.
//!
//! The wire protocol is implemented elsewhere. A session drives it through
//! [`ControlChannel`], created by a [`Connector`] once credentials are known.

use std::sync::Arc;

use crate::{
    config::{Credentials, DeviceConfig},
    error::Result,
    events::Event,
    track::TrackInfo,
};

/// Receives decoded audio from the control channel.
///
/// Called with raw audio and the key of the queue entry it belongs to.
/// Returns how many bytes were consumed; 0 asks the caller to retry later.
pub type DataCallback = Box<dyn Fn(&[u8], &str) -> usize + Send + Sync>;

/// Opaque authentication blob returned by a login. Empty means refused.
pub type AuthData = Vec<u8>;

/// Looks up tracks in the remote queue.
pub trait TrackQueue: Send + Sync {
    /// Metadata of the queue entry with this key, if known.
    fn track_info(&self, track_key: &str) -> Option<TrackInfo>;
}

/// One authenticated connection to the cloud service.
///
/// All methods take `&self`: [`handle_packet`](Self::handle_packet) runs on
/// the session thread while renderer feedback calls the notification methods
/// from other threads.
pub trait ControlChannel: Send + Sync {
    /// Opens the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the access point cannot be reached.
    fn connect(&self) -> Result<()>;

    /// Logs in with the credentials the channel was opened with.
    ///
    /// # Errors
    ///
    /// Returns an error when the login could not be attempted, e.g. because
    /// the connection dropped.
    fn authenticate(&self) -> Result<AuthData>;

    /// Reusable credentials of the logged in account as JSON.
    fn credentials_json(&self) -> String;

    /// Waits for and processes one packet, returning the control events it
    /// produced. May call the data callback while doing so.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is lost.
    fn handle_packet(&self) -> Result<Vec<Event>>;

    fn disconnect(&self);

    /// Reports the local volume to the remote clients.
    fn set_remote_volume(&self, volume: u16);

    /// Reports the playback position in milliseconds into the current track.
    fn update_position_ms(&self, position: u32);

    /// Reports that audio of the next track reached the listener.
    fn notify_audio_reached_playback(&self);

    /// Reports that the last track finished playing.
    fn notify_audio_ended(&self);

    fn set_pause(&self, paused: bool);

    /// Installs or detaches the audio sink. After detaching returns, the
    /// previous callback is no longer called.
    fn set_data_callback(&self, callback: Option<DataCallback>);

    fn track_queue(&self) -> Arc<dyn TrackQueue>;
}

/// Creates control channels and describes the device to zero-conf clients.
pub trait Connector: Send + Sync {
    /// Body of the zero-conf `getInfo` answer for this device.
    fn zeroconf_info(&self, device: &DeviceConfig) -> serde_json::Value;

    /// Creates a control channel for the device. The channel is not
    /// connected yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be set up.
    fn open(
        &self,
        device: &DeviceConfig,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ControlChannel>>;
}
