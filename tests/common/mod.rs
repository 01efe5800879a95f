#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use shadowcast::{
    audio::ContentLength,
    config::{Config, Credentials, DeviceConfig},
    error::{Error, Result},
    events::{Event, ShadowEvent},
    player::{Backend, Player},
    remote::{AuthData, Connector, ControlChannel, DataCallback, TrackQueue},
    shadow::{ShadowSink, SharedLock},
    streamer::{Streamer, StreamerFactory, StreamerParams, StreamerState},
    track::{Metadata, StartOffset, TrackInfo},
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `condition` until it holds or the timeout passes.
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkCommand {
    Load {
        url: String,
        metadata: Metadata,
        start_position: u32,
    },
    Play,
    Pause,
    Stop,
    Volume(u16),
    Credentials(String),
}

#[derive(Default)]
pub struct RecordingSink {
    pub commands: Mutex<Vec<SinkCommand>>,
    pub start_position: bool,
}

impl RecordingSink {
    pub fn commands(&self) -> Vec<SinkCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands without the credentials hand-over.
    pub fn playback_commands(&self) -> Vec<SinkCommand> {
        self.commands()
            .into_iter()
            .filter(|command| !matches!(command, SinkCommand::Credentials(_)))
            .collect()
    }

    pub fn loads(&self) -> Vec<(String, Metadata, u32)> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                SinkCommand::Load {
                    url,
                    metadata,
                    start_position,
                } => Some((url, metadata, start_position)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, command: &SinkCommand) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    fn record(&self, command: SinkCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

impl ShadowSink for RecordingSink {
    fn load(&self, url: &str, metadata: &Metadata, start_position: u32) {
        self.record(SinkCommand::Load {
            url: url.to_owned(),
            metadata: metadata.clone(),
            start_position,
        });
    }

    fn play(&self) {
        self.record(SinkCommand::Play);
    }

    fn pause(&self) {
        self.record(SinkCommand::Pause);
    }

    fn stop(&self) {
        self.record(SinkCommand::Stop);
    }

    fn volume(&self, volume: u16) {
        self.record(SinkCommand::Volume(volume));
    }

    fn credentials(&self, json: &str) {
        self.record(SinkCommand::Credentials(json.to_owned()));
    }

    fn uses_start_position(&self) -> bool {
        self.start_position
    }
}

pub struct MockStreamer {
    pub index: u32,
    pub key: String,
    pub info: Mutex<TrackInfo>,
    pub offset: Mutex<StartOffset>,
    pub state: Mutex<StreamerState>,
    pub content_length: Mutex<ContentLength>,
    pub fed: AtomicUsize,
    pub flushes: AtomicUsize,
    pub started: AtomicBool,
}

impl MockStreamer {
    pub fn url_for(index: u32) -> String {
        format!("http://127.0.0.1:9000/stream/{index}.mp3")
    }

    pub fn state(&self) -> StreamerState {
        *self.state.lock().unwrap()
    }

    pub fn fed(&self) -> usize {
        self.fed.load(Ordering::SeqCst)
    }
}

impl Streamer for MockStreamer {
    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn feed(&self, data: &[u8]) -> usize {
        self.fed.fetch_add(data.len(), Ordering::SeqCst);
        data.len()
    }

    fn offset(&self) -> StartOffset {
        *self.offset.lock().unwrap()
    }

    fn set_offset(&self, offset: StartOffset) {
        *self.offset.lock().unwrap() = offset;
    }

    fn metadata(&self) -> Metadata {
        Metadata::from(&*self.info.lock().unwrap())
    }

    fn set_content_length(&self, content_length: ContentLength) {
        *self.content_length.lock().unwrap() = content_length;
    }

    fn stream_url(&self) -> String {
        Self::url_for(self.index)
    }

    fn stream_id(&self) -> String {
        format!("{}-{}", self.index, self.key)
    }

    fn track_key(&self) -> String {
        self.key.clone()
    }

    fn track_info(&self) -> TrackInfo {
        self.info.lock().unwrap().clone()
    }

    fn set_track_info(&self, info: TrackInfo) {
        *self.info.lock().unwrap() = info;
    }

    fn set_state(&self, state: StreamerState) {
        *self.state.lock().unwrap() = state;
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub created: Mutex<Vec<Arc<MockStreamer>>>,
    pub params: Mutex<Vec<StreamerParams>>,
    pub fail: AtomicBool,
}

impl MockFactory {
    pub fn created(&self) -> Vec<Arc<MockStreamer>> {
        self.created.lock().unwrap().clone()
    }

    pub fn streamer(&self, index: usize) -> Arc<MockStreamer> {
        Arc::clone(&self.created.lock().unwrap()[index])
    }
}

impl StreamerFactory for MockFactory {
    fn create(&self, params: StreamerParams) -> Result<Arc<dyn Streamer>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::resource_exhausted("no port left"));
        }

        let streamer = Arc::new(MockStreamer {
            index: params.index,
            key: params.track_key.clone(),
            info: Mutex::new(params.track_info.clone()),
            offset: Mutex::new(params.offset),
            state: Mutex::new(StreamerState::Active),
            content_length: Mutex::new(params.content_length),
            fed: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        });

        self.params.lock().unwrap().push(params);
        self.created.lock().unwrap().push(Arc::clone(&streamer));
        Ok(streamer as Arc<dyn Streamer>)
    }
}

#[derive(Default)]
pub struct MockTrackQueue {
    pub tracks: Mutex<HashMap<String, TrackInfo>>,
}

impl TrackQueue for MockTrackQueue {
    fn track_info(&self, track_key: &str) -> Option<TrackInfo> {
        self.tracks.lock().unwrap().get(track_key).cloned()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelCall {
    Connect,
    Disconnect,
    RemoteVolume(u16),
    Position(u32),
    ReachedPlayback,
    AudioEnded,
    Pause(bool),
}

/// What the next `handle_packet` does besides waiting for events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    Error,
    Panic,
}

pub struct MockChannel {
    pub calls: Mutex<Vec<ChannelCall>>,
    pub queue: Arc<MockTrackQueue>,

    events_tx: Sender<Vec<Event>>,
    events_rx: Receiver<Vec<Event>>,

    callback: Mutex<Option<DataCallback>>,
    retired: Mutex<Vec<DataCallback>>,

    pub auth_data: Mutex<Option<AuthData>>,
    pub connect_failures: AtomicU32,
    pub failure: Mutex<Option<Failure>>,
}

impl Default for MockChannel {
    fn default() -> Self {
        // Rendezvous: a send returns once the pump took the events.
        let (events_tx, events_rx) = crossbeam_channel::bounded(0);
        Self {
            calls: Mutex::new(Vec::new()),
            queue: Arc::new(MockTrackQueue::default()),
            events_tx,
            events_rx,
            callback: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            auth_data: Mutex::new(Some(b"auth".to_vec())),
            connect_failures: AtomicU32::new(0),
            failure: Mutex::new(None),
        }
    }
}

impl MockChannel {
    pub fn calls(&self) -> Vec<ChannelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &ChannelCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn positions(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChannelCall::Position(position) => Some(position),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    /// Delivers events to the pump and waits until they were dispatched.
    pub fn send(&self, events: Vec<Event>) -> bool {
        self.events_tx.send_timeout(events, TIMEOUT).is_ok()
            && self.events_tx.send_timeout(Vec::new(), TIMEOUT).is_ok()
    }

    /// Delivers events without waiting for the pump to come back, for
    /// events that end the pump.
    pub fn post(&self, events: Vec<Event>) -> bool {
        self.events_tx.send_timeout(events, TIMEOUT).is_ok()
    }

    /// Feeds audio like the decoder would.
    pub fn feed(&self, data: &[u8], track_key: &str) -> usize {
        self.callback
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |callback| callback(data, track_key))
    }

    /// Feeds audio through callbacks that were detached, like a decoder
    /// racing the detach would.
    pub fn feed_retired(&self, data: &[u8], track_key: &str) -> usize {
        self.retired
            .lock()
            .unwrap()
            .iter()
            .map(|callback| callback(data, track_key))
            .sum()
    }

    pub fn fail_next(&self, failure: Failure) {
        *self.failure.lock().unwrap() = Some(failure);
    }

    fn record(&self, call: ChannelCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ControlChannel for MockChannel {
    fn connect(&self) -> Result<()> {
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::unavailable("access point unreachable"));
        }

        self.record(ChannelCall::Connect);
        Ok(())
    }

    fn authenticate(&self) -> Result<AuthData> {
        self.auth_data
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::unauthenticated("bad credentials"))
    }

    fn credentials_json(&self) -> String {
        String::from(r#"{"username":"someone","auth_type":1}"#)
    }

    fn handle_packet(&self) -> Result<Vec<Event>> {
        let failure = self.failure.lock().unwrap().take();
        match failure {
            Some(Failure::Error) => return Err(Error::aborted("connection reset")),
            Some(Failure::Panic) => panic!("malformed packet"),
            None => {}
        }

        match self.events_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(events) => Ok(events),
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => Err(Error::unavailable("gone")),
        }
    }

    fn disconnect(&self) {
        self.record(ChannelCall::Disconnect);
    }

    fn set_remote_volume(&self, volume: u16) {
        self.record(ChannelCall::RemoteVolume(volume));
    }

    fn update_position_ms(&self, position: u32) {
        self.record(ChannelCall::Position(position));
    }

    fn notify_audio_reached_playback(&self) {
        self.record(ChannelCall::ReachedPlayback);
    }

    fn notify_audio_ended(&self) {
        self.record(ChannelCall::AudioEnded);
    }

    fn set_pause(&self, paused: bool) {
        self.record(ChannelCall::Pause(paused));
    }

    fn set_data_callback(&self, callback: Option<DataCallback>) {
        let previous = std::mem::replace(&mut *self.callback.lock().unwrap(), callback);
        if let Some(previous) = previous {
            self.retired.lock().unwrap().push(previous);
        }
    }

    fn track_queue(&self) -> Arc<dyn TrackQueue> {
        Arc::clone(&self.queue) as Arc<dyn TrackQueue>
    }
}

pub struct MockConnector {
    pub channel: Arc<MockChannel>,
    pub opened: Mutex<Vec<Credentials>>,
}

impl MockConnector {
    pub fn new(channel: Arc<MockChannel>) -> Self {
        Self {
            channel,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<Credentials> {
        self.opened.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn zeroconf_info(&self, device: &DeviceConfig) -> serde_json::Value {
        serde_json::json!({
            "status": 101,
            "remoteName": device.name,
            "deviceID": device.id,
        })
    }

    fn open(&self, _device: &DeviceConfig, credentials: &Credentials) -> Result<Arc<dyn ControlChannel>> {
        self.opened.lock().unwrap().push(credentials.clone());
        Ok(Arc::clone(&self.channel) as Arc<dyn ControlChannel>)
    }
}

/// A player wired to recording mocks.
pub struct Harness {
    pub player: Option<Player>,
    pub lock: SharedLock,
    pub sink: Arc<RecordingSink>,
    pub channel: Arc<MockChannel>,
    pub connector: Arc<MockConnector>,
    pub factory: Arc<MockFactory>,
}

pub fn stored_device(name: &str, flow: bool) -> DeviceConfig {
    let mut device = DeviceConfig::new(name);
    device.credentials = Some(String::from(r#"{"token":"stored"}"#));
    device.flow = flow;
    device
}

pub fn quick_config() -> Config {
    Config {
        reconnect_delay_ms: 10,
        ..Config::default()
    }
}

impl Harness {
    /// Starts a player with stored credentials and waits until it is linked.
    pub fn linked(flow: bool) -> Self {
        let harness = Self::start(&quick_config(), stored_device("Test Room", flow), RecordingSink::default());
        assert!(harness.wait_linked(), "player did not link");
        harness
    }

    pub fn start(config: &Config, device: DeviceConfig, sink: RecordingSink) -> Self {
        Self::start_with(config, device, sink, MockChannel::default())
    }

    pub fn start_with(
        config: &Config,
        device: DeviceConfig,
        sink: RecordingSink,
        channel: MockChannel,
    ) -> Self {
        init_logger();

        let sink = Arc::new(sink);
        let channel = Arc::new(channel);
        let connector = Arc::new(MockConnector::new(Arc::clone(&channel)));
        let factory = Arc::new(MockFactory::default());
        let lock = SharedLock::new();

        let backend = Backend {
            connector: Arc::clone(&connector) as Arc<dyn Connector>,
            streamers: Arc::clone(&factory) as Arc<dyn StreamerFactory>,
        };
        let player = Player::create(
            config,
            device,
            backend,
            Arc::clone(&sink) as Arc<dyn ShadowSink>,
            lock.clone(),
        )
        .unwrap();

        Self {
            player: Some(player),
            lock,
            sink,
            channel,
            connector,
            factory,
        }
    }

    pub fn player(&self) -> &Player {
        self.player.as_ref().unwrap()
    }

    pub fn wait_linked(&self) -> bool {
        wait_for(|| self.channel.has_callback())
    }

    pub fn add_track(&self, key: &str, track_id: &str, duration: u32) {
        self.channel.queue.tracks.lock().unwrap().insert(
            key.to_owned(),
            TrackInfo {
                track_id: track_id.to_owned(),
                name: format!("Track {track_id}"),
                artist: String::from("Artist"),
                album: String::from("Album"),
                image_url: String::new(),
                duration,
            },
        );
    }

    pub fn send(&self, events: Vec<Event>) {
        assert!(self.channel.send(events), "pump did not take events");
    }

    pub fn feed(&self, track_key: &str) -> usize {
        self.channel.feed(&[0; 512], track_key)
    }

    pub fn notify(&self, event: ShadowEvent) {
        let mut guard = self.lock.lock();
        self.player().notify(&mut guard, event);
    }

    /// Starts a playing session and feeds the first track.
    pub fn play_first(&self, key: &str) -> Arc<MockStreamer> {
        self.send(vec![Event::PlaybackStart(0), Event::PlayPause(false)]);
        assert_eq!(self.feed(key), 512);
        self.factory.streamer(self.factory.created().len() - 1)
    }

    pub fn destroy(&mut self) {
        if let Some(player) = self.player.take() {
            player.destroy();
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.destroy();
    }
}
