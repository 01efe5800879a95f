//! Player sessions.
//!
//! A [`Player`] bridges one output device: it logs in to the control channel,
//! turns control events into renderer commands, manages the streamers that
//! serve audio to the renderer and reports the renderer's progress back.
//!
//! Three threads meet in a player:
//! * the session thread, pumping the control channel (see [`crate::session`])
//! * the thread delivering audio through the data callback
//! * the renderer, reporting [`ShadowEvent`]s
//!
//! All of them mutate session state only while holding the [`SharedLock`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use shadowcast::{
//!     config::{Config, DeviceConfig},
//!     events::ShadowEvent,
//!     player::{Backend, Player},
//!     shadow::{ShadowSink, SharedLock},
//! };
//!
//! fn bridge(backend: Backend, sink: Arc<dyn ShadowSink>) -> shadowcast::error::Result<()> {
//!     let config = Config::default();
//!     let lock = SharedLock::new();
//!     let player = Player::create(&config, DeviceConfig::new("Kitchen"), backend, sink, lock.clone())?;
//!
//!     // The renderer reports progress with the lock held.
//!     let mut guard = lock.lock();
//!     player.notify(&mut guard, ShadowEvent::Time(1_000));
//!     drop(guard);
//!
//!     player.destroy();
//!     Ok(())
//! }
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use once_cell::sync::Lazy;

use crate::{
    config::{Config, Credentials, DeviceConfig},
    error::{Error, Result},
    events::{Event, ShadowEvent},
    registry::{Registry, SessionId},
    remote::{ControlChannel, Connector},
    session,
    shadow::{ShadowSink, SharedGuard, SharedLock, State},
    streamer::{StreamerFactory, StreamerParams, StreamerState},
    track::{Metadata, StartOffset, TrackInfo},
    util::Signal,
    zeroconf::{self, ZeroConf},
};

/// Sessions that may still receive audio.
static REGISTRY: Lazy<Registry<Inner>> = Lazy::new(Registry::new);

/// Positions drifting further than this from the extrapolated position are
/// reported to the control channel.
const POSITION_TOLERANCE_MS: u128 = 5_000;

/// External collaborators of a player.
#[derive(Clone)]
pub struct Backend {
    pub connector: Arc<dyn Connector>,
    pub streamers: Arc<dyn StreamerFactory>,
}

/// Connectivity of the control session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkState {
    /// Pumping control messages.
    Linked,

    /// The remote client released the device.
    Disconnecting,

    /// The session must end, e.g. on teardown or an unexpected stop.
    Aborted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linked => write!(f, "linked"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct AtomicLinkState(AtomicU8);

impl AtomicLinkState {
    fn new(state: LinkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> LinkState {
        match self.0.load(Ordering::Acquire) {
            0 => LinkState::Linked,
            1 => LinkState::Disconnecting,
            _ => LinkState::Aborted,
        }
    }

    pub fn store(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves from `current` to `new`. Returns whether the state was
    /// `current`.
    pub fn transition(&self, current: LinkState, new: LinkState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Flags read by the data callback before anything else.
#[derive(Debug)]
pub(crate) struct Flags {
    pub running: AtomicBool,
    pub paused: AtomicBool,

    /// Mirrors whether the session holds any streamer.
    pub has_streamer: AtomicBool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(true),
            has_streamer: AtomicBool::new(false),
        }
    }
}

pub(crate) struct Inner {
    pub device: DeviceConfig,
    pub config: Config,
    pub sink: Arc<dyn ShadowSink>,
    pub backend: Backend,
    pub lock: SharedLock,
    pub flags: Arc<Flags>,
    pub link: AtomicLinkState,

    /// Wakes the session loop when zero-conf credentials arrived or on
    /// teardown.
    pub client_connected: Signal,

    /// Credentials for the next login.
    pub credentials: Arc<Mutex<Option<Credentials>>>,

    zeroconf: Mutex<Option<ZeroConf>>,

    /// Control channel of the running session, if any. Taken after the
    /// shared lock when both are needed.
    channel: Mutex<Option<Arc<dyn ControlChannel>>>,
}

/// One bridged output device.
pub struct Player {
    inner: Arc<Inner>,
    id: SessionId,
    thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Creates the session for `device` and starts its thread.
    ///
    /// `lock` is the renderer's end of the [`SharedLock`]. It can drive one
    /// player at a time.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` if `lock` is bound to another player, or
    /// an error if the session thread cannot be spawned.
    pub fn create(
        config: &Config,
        device: DeviceConfig,
        backend: Backend,
        sink: Arc<dyn ShadowSink>,
        lock: SharedLock,
    ) -> Result<Self> {
        if !lock.bind() {
            return Err(Error::failed_precondition(format!(
                "lock for {} is bound to another player",
                device.name
            )));
        }

        let inner = Arc::new(Inner {
            device,
            config: Config {
                devices: Vec::new(),
                ..config.clone()
            },
            sink,
            backend,
            lock,
            flags: Arc::new(Flags::default()),
            link: AtomicLinkState::new(LinkState::Aborted),
            client_connected: Signal::new(),
            credentials: Arc::new(Mutex::new(None)),
            zeroconf: Mutex::new(None),
            channel: Mutex::new(None),
        });

        let id = REGISTRY.insert(&inner);
        inner.flags.running.store(true, Ordering::Release);
        info!(
            "creating player <{}> ({id}, {} live)",
            inner.device.name,
            REGISTRY.len()
        );

        let spawned = thread::Builder::new()
            .name(format!("player {}", inner.device.name))
            .spawn({
                let inner = Arc::clone(&inner);
                move || session::run(&inner, id)
            });

        match spawned {
            Ok(thread) => Ok(Self {
                inner,
                id,
                thread: Some(thread),
            }),
            Err(e) => {
                REGISTRY.remove(id);
                inner.flags.running.store(false, Ordering::Release);
                inner.lock.unbind();
                Err(e.into())
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.device.name
    }

    #[must_use]
    pub fn device(&self) -> &DeviceConfig {
        &self.inner.device
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.inner.link.load()
    }

    /// Port of the zero-conf endpoint, while it is up.
    #[must_use]
    pub fn zeroconf_port(&self) -> Option<u16> {
        self.inner.zeroconf().as_ref().map(ZeroConf::port)
    }

    /// Handles feedback from the renderer. `guard` must have been taken from
    /// the lock this player was created with.
    pub fn notify(&self, guard: &mut SharedGuard<'_>, event: ShadowEvent) {
        if !self.inner.lock.owns(guard) {
            error!("shadow event {event:?} for {} with a foreign lock", self.name());
            return;
        }
        if !REGISTRY.contains(self.id) {
            error!("shadow event {event:?} for destroyed player {}", self.name());
            return;
        }

        let state = &mut *guard.state;
        self.inner.feedback(state, event);
        self.inner.sync_flags(state);
    }

    /// Like [`notify`](Self::notify), taking the shared lock itself.
    pub fn notify_event(&self, event: ShadowEvent) {
        let mut guard = self.inner.lock.lock();
        self.notify(&mut guard, event);
    }

    /// Metadata of the queued streamer serving `url`.
    #[must_use]
    pub fn metadata_for_url(&self, guard: &SharedGuard<'_>, url: &str) -> Option<Metadata> {
        if !self.inner.lock.owns(guard) {
            error!("metadata lookup for {} with a foreign lock", self.name());
            return None;
        }

        guard
            .state
            .queue
            .find_by_url(url)
            .map(|streamer| streamer.metadata())
    }

    /// Tears the session down and waits for its thread to finish.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let name = self.inner.device.name.clone();

        // No new data callbacks from here on.
        REGISTRY.remove(self.id);

        self.inner.flags.running.store(false, Ordering::Release);
        self.inner.link.store(LinkState::Aborted);
        info!("player <{name}> deletion pending");

        self.inner.client_connected.give();

        if let Some(channel) = self.inner.channel() {
            channel.set_data_callback(None);
        }

        self.inner.disable_zeroconf();

        if thread.join().is_err() {
            error!("session thread of player <{name}> panicked");
        }

        self.inner.lock.unbind();
        info!("player <{name}> done");
        if REGISTRY.is_empty() {
            debug!("no players left");
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("name", &self.inner.device.name)
            .field("id", &self.id)
            .field("link", &self.inner.link.load())
            .finish_non_exhaustive()
    }
}

/// Entry point of the data callback.
///
/// Returns how many bytes of `data` were taken, 0 to have the caller retry
/// later. Never logs a rejection.
pub(crate) fn write_audio(flags: &Flags, id: SessionId, data: &[u8], track_key: &str) -> usize {
    if !flags.running.load(Ordering::Acquire)
        || (flags.paused.load(Ordering::Acquire) && flags.has_streamer.load(Ordering::Acquire))
    {
        return 0;
    }

    let Some(inner) = REGISTRY.upgrade(id) else {
        return 0;
    };

    let mut guard = inner.lock.lock();
    let state = &mut *guard.state;

    if state.stream_track_key != track_key {
        // Renderers take one next URI at most.
        if state.queue.is_full() {
            return 0;
        }

        let previous_key = std::mem::replace(&mut state.stream_track_key, track_key.to_owned());
        let was_flushed = std::mem::replace(&mut state.flushed, false);
        info!(
            "track key update {} => {track_key}",
            if previous_key.is_empty() {
                "none"
            } else {
                previous_key.as_str()
            }
        );

        if !inner.track_handler(state, track_key) {
            // Retried with the next delivery of this track.
            state.stream_track_key = previous_key;
            state.flushed = was_flushed;
            return 0;
        }
    }

    let accepted = if state.flushed {
        data.len()
    } else {
        state.queue.front().map_or(0, |streamer| streamer.feed(data))
    };

    inner.sync_flags(state);
    accepted
}

impl Inner {
    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::Acquire)
    }

    pub fn channel(&self) -> Option<Arc<dyn ControlChannel>> {
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_channel(&self, channel: Option<Arc<dyn ControlChannel>>) {
        *self.channel.lock().unwrap_or_else(PoisonError::into_inner) = channel;
    }

    fn zeroconf(&self) -> MutexGuard<'_, Option<ZeroConf>> {
        self.zeroconf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the zero-conf endpoint unless it is up already.
    pub fn enable_zeroconf(&self) -> Result<()> {
        let mut zeroconf = self.zeroconf();
        if zeroconf.is_some() {
            return Ok(());
        }

        let handler = Arc::new(ZeroConfHandler {
            connector: Arc::clone(&self.backend.connector),
            device: self.device.clone(),
            credentials: Arc::clone(&self.credentials),
            client_connected: self.client_connected.clone(),
        });

        *zeroconf = Some(ZeroConf::start(
            &self.device.name,
            self.config.zeroconf_port,
            &self.config.zeroconf_path,
            handler,
        )?);
        Ok(())
    }

    fn disable_zeroconf(&self) {
        let zeroconf = self.zeroconf().take();
        if let Some(zeroconf) = zeroconf {
            zeroconf.close();
        }
    }

    pub fn sync_flags(&self, state: &State) {
        self.flags
            .has_streamer
            .store(state.has_streamer(), Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::Acquire)
    }

    /// Routes a control event. Called with the shared lock held.
    pub fn dispatch(&self, state: &mut State, event: Event) {
        match event {
            Event::PlaybackStart(position) => self.playback_start(state, position),

            Event::PlayPause(paused) => {
                self.flags.paused.store(paused, Ordering::Release);
                info!("{}", if paused { "pause" } else { "play" });
                if state.has_streamer() {
                    if paused {
                        self.sink.pause();
                    } else {
                        self.sink.play();
                    }
                }
            }

            Event::Flush => {
                info!("flush");
                state.flushed = true;
            }

            Event::Next | Event::Prev => {
                info!("next/prev");
                self.sink.stop();
            }

            Event::Disconnect => self.disconnect(state, false),

            Event::Seek(position) => self.seek(state, position),

            Event::Depleted => {
                state.playlist_ended = true;
                if let Some(front) = state.queue.front() {
                    front.set_state(StreamerState::Draining);
                    info!("playlist ended, no track left to play");
                } else {
                    error!("playlist depleted without a streamer");
                }
            }

            Event::Volume(volume) => {
                state.volume = volume;
                self.sink.volume(volume);
            }

            Event::TrackInfo(info) => {
                // Only remembered: in flow mode the stream position of this
                // track is unknown until a seek restarts the stream.
                info!("started track {info}");
                state.flow.track_info = Some(info);
            }
        }
    }

    fn playback_start(&self, state: &mut State, position: u32) {
        let active_key = state.active.as_ref().map(|active| active.track_key());
        if let Some(active_key) = active_key.filter(|key| state.flushed && *key != state.stream_track_key) {
            // The queue was replaced but the renderer keeps playing: keep
            // the active stream, drop the prefetched one.
            debug!("playback restart after flush, keeping {active_key}");
            state.queue.clear();
            state.stream_track_key = active_key;
            state.start_offset = 0;
            state.suppress_next_notify = true;
            return;
        }

        self.sink.stop();
        info!("========== playback session start ==========");
        info!("new track will start at {position} ms");

        state.start_offset = position;
        state.stream_track_key.clear();
        state.queue.clear();
        state.active = None;
        state.playlist_ended = false;
        state.flow.reset();

        // Not sent by the remote side on connect.
        if let Some(channel) = self.channel() {
            channel.set_remote_volume(state.volume);
        }
    }

    /// Ends the control session. Called with the shared lock held.
    pub fn disconnect(&self, state: &mut State, abort: bool) {
        info!("========== playback session end ==========");
        info!("disconnecting {}", self.device.name);

        if abort {
            self.link.store(LinkState::Aborted);
        } else {
            self.link.transition(LinkState::Linked, LinkState::Disconnecting);
        }

        self.sink.stop();
        state.queue.clear();
        state.active = None;
    }

    /// Restarts the current stream at `position`.
    ///
    /// Renderers cannot seek in a live stream. The streamer is kept and
    /// reloaded, so the renderer opens a new connection on the same URL.
    fn seek(&self, state: &mut State, position: u32) {
        // The renderer may not have reported the track yet.
        let Some(streamer) = state
            .active
            .clone()
            .or_else(|| state.queue.back().cloned())
        else {
            info!("trying to seek before track has started");
            return;
        };

        streamer.flush();
        let offset = StartOffset::from_position(position);
        streamer.set_offset(offset);
        info!("seeking from streamer {} at {position} ms", streamer.stream_id());

        state.queue.reset_to(Arc::clone(&streamer));
        state.flow.markers.clear();
        state.stream_track_key = streamer.track_key();
        state.last_position = None;

        self.sink.stop();

        streamer.set_content_length(self.device.session_content_length());
        if self.device.flow {
            if let Some(info) = state.flow.track_info.clone() {
                streamer.set_track_info(info);
            }
        }

        let metadata = streamer.metadata().adjusted_by(offset);
        if self.device.flow {
            state.flow.markers.push(metadata.duration);
        }

        self.sink.load(&streamer.stream_url(), &metadata, position);
        if !self.is_paused() {
            self.sink.play();
        }
    }

    /// Sets up the stream for a track key seen for the first time. Called
    /// with the shared lock held. Returns `false` if the track has no stream
    /// to go to.
    fn track_handler(&self, state: &mut State, track_key: &str) -> bool {
        let flow = self.device.flow;

        let info = self
            .channel()
            .and_then(|channel| channel.track_queue().track_info(track_key))
            .unwrap_or_else(|| {
                warn!("no track info for {track_key}");
                TrackInfo::default()
            });
        info!("new track id {} => <{}>", info.track_id, info.name);

        if state.queue.is_empty() || !flow {
            self.create_streamer(state, track_key, info)
        } else {
            if state.flow.append(&info.track_id, info.duration) {
                info!("[flow] playlist loop detected, already played <{}>", info.name);
            }
            info!(
                "[flow] track <{}> ({} ms) ends at {:?} ms ({} markers, {} played)",
                info.name,
                info.duration,
                state.flow.markers.latest(),
                state.flow.markers.len(),
                state.flow.played.len()
            );

            if let Some(streamer) = state.active.as_ref().or_else(|| state.queue.front()) {
                streamer.set_track_info(info);
            }
            true
        }
    }

    fn create_streamer(&self, state: &mut State, track_key: &str, info: TrackInfo) -> bool {
        let flow = self.device.flow;
        let offset = if state.queue.is_empty() {
            StartOffset::from_position(state.start_offset)
        } else {
            StartOffset::ZERO
        };

        let params = StreamerParams {
            address: self.device.address,
            device_id: self.device.id.clone(),
            index: state.next_index(),
            codec: self.device.codec.clone(),
            flow,
            content_length: self.device.session_content_length(),
            cache_mode: self.device.cache_mode,
            track_info: info.clone(),
            track_key: track_key.to_owned(),
            offset,
        };

        let streamer = match self.backend.streamers.create(params) {
            Ok(streamer) => streamer,
            Err(e) => {
                error!("could not create streamer for {info}: {e}");
                return false;
            }
        };
        info!("loading with id {}", streamer.stream_id());

        // Only ever non-flow here: a flow stream is created into an empty
        // queue.
        if let Some(front) = state.queue.front() {
            front.set_state(StreamerState::Draining);
            info!("draining track {}", front.stream_id());
        }

        let mut metadata = streamer.metadata();
        if flow {
            // Markers count whole tracks, the offset only moves the start.
            state.flow.start(&info.track_id, metadata.duration);
            info!("[flow] set marker at {} ms for <{}>", metadata.duration, info.name);
        } else {
            metadata = metadata.adjusted_by(streamer.offset());
        }

        self.sink
            .load(&streamer.stream_url(), &metadata, streamer.offset().position());
        if !self.is_paused() {
            self.sink.play();
        }

        match state.queue.push_front(Arc::clone(&streamer)) {
            Ok(()) => {
                streamer.start();
                true
            }
            Err(streamer) => {
                error!("streamer queue full, dropping {}", streamer.stream_id());
                false
            }
        }
    }

    /// Handles renderer feedback. Called with the shared lock held.
    fn feedback(&self, state: &mut State, event: ShadowEvent) {
        match (event, self.channel()) {
            (ShadowEvent::Volume(volume), channel) => {
                state.volume = volume;
                if let Some(channel) = channel {
                    channel.set_remote_volume(volume);
                }
            }

            (_, None) => {}

            (ShadowEvent::Time(position), Some(channel)) => {
                self.update_position(state, &*channel, position);
            }

            (ShadowEvent::TrackChanged(url), Some(channel)) => {
                self.track_changed(state, &*channel, &url);
            }

            (ShadowEvent::Play, Some(channel)) => channel.set_pause(false),
            (ShadowEvent::Pause, Some(channel)) => channel.set_pause(true),

            (ShadowEvent::Stop, Some(channel)) => {
                if state.active.is_some() && state.playlist_ended {
                    state.playlist_ended = false;
                    channel.notify_audio_ended();
                } else {
                    // Frees the account for other devices.
                    warn!("unexpected stop on {}", self.device.name);
                    self.disconnect(state, true);
                }
            }
        }
    }

    fn update_position(&self, state: &mut State, channel: &dyn ControlChannel, position: u32) {
        let Some(active) = state.active.clone() else {
            return;
        };

        let now = Instant::now();
        let expected = state.last_position.map(|last| {
            u128::from(last) + now.duration_since(state.last_timestamp).as_millis()
        });

        let authoritative = expected
            .is_none_or(|expected| expected.abs_diff(u128::from(position)) > POSITION_TOLERANCE_MS);
        if authoritative {
            let offset = active.offset();
            info!(
                "adjusting real position {position} from {} (offset is {offset})",
                expected.unwrap_or_default()
            );

            let reported = if self.sink.uses_start_position() {
                position
            } else {
                offset.to_track_position(position)
            };
            channel.update_position_ms(reported);
        }

        state.last_position = Some(position);
        state.last_timestamp = now;

        if self.device.flow && state.flow.markers.is_crossed_at(position) {
            let boundary = state.flow.markers.cross();
            info!(
                "[flow] track boundary at {boundary:?} ms ({} markers left), now <{}>",
                state.flow.markers.len(),
                active.track_info().name
            );
            Self::reached_playback(state, channel);
        }
    }

    fn track_changed(&self, state: &mut State, channel: &dyn ControlChannel, url: &str) {
        if state.queue.is_empty()
            || state
                .active
                .as_ref()
                .is_some_and(|active| url.contains(&active.stream_url()))
        {
            return;
        }

        // Drop streamers the renderer moved past, normally just one.
        let active = loop {
            match state.queue.back() {
                Some(back) if url.contains(&back.stream_url()) => break Arc::clone(back),
                Some(_) => {
                    state.queue.pop_back();
                }
                None => {
                    warn!("renderer plays unknown url {url}");
                    return;
                }
            }
        };

        info!(
            "track {} started by url ({} queued)",
            active.stream_id(),
            state.queue.len()
        );
        state.active = Some(active);
        state.last_position = None;

        Self::reached_playback(state, channel);

        // Replaced by the next time report.
        channel.update_position_ms(0);
    }

    fn reached_playback(state: &mut State, channel: &dyn ControlChannel) {
        if state.suppress_next_notify {
            debug!("track change already known to the remote side");
            state.suppress_next_notify = false;
        } else {
            channel.notify_audio_reached_playback();
        }
    }
}

/// Stores credentials posted to the zero-conf endpoint and wakes the session.
struct ZeroConfHandler {
    connector: Arc<dyn Connector>,
    device: DeviceConfig,
    credentials: Arc<Mutex<Option<Credentials>>>,
    client_connected: Signal,
}

impl zeroconf::Handler for ZeroConfHandler {
    fn info(&self) -> serde_json::Value {
        self.connector.zeroconf_info(&self.device)
    }

    fn add_user(&self, form: HashMap<String, String>) {
        info!("zero-conf credentials received for {}", self.device.name);
        *self.credentials.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Credentials::ZeroConf(form));
        self.client_connected.give();
    }
}
