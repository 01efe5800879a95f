//! Configuration of the bridge and of the devices it exposes.
//!
//! Configuration is read from a TOML file:
//!
//! ```toml
//! username = "someone"
//! password = "secret"
//! reconnect_delay_ms = 1000
//!
//! [[device]]
//! name = "Living Room"
//! address = "192.168.1.20"
//! bitrate = 320
//! codec = "flc"
//! flow = true
//! content_length = "chunked"
//! ```
//!
//! Devices without a name are named after the host, devices without an id
//! get a stable id derived from the machine id and their name.

use std::{collections::HashMap, fs, net::IpAddr, net::Ipv4Addr, path::Path, time::Duration};

use serde::Deserialize;
use uuid::Uuid;
use veil::Redact;

use crate::{
    audio::{AudioFormat, CacheMode, ContentLength},
    error::{Error, Result},
};

/// Credentials a session logs in with, in order of precedence.
#[derive(Clone, Redact, PartialEq, Eq)]
pub enum Credentials {
    /// Account name and password, shared by all devices.
    UserPass {
        username: String,
        #[redact]
        password: String,
    },

    /// Reusable credentials as handed out by a previous login.
    Stored(#[redact] String),

    /// Form fields posted by a client to the zero-conf endpoint.
    ZeroConf(#[redact] HashMap<String, String>),
}

/// Process-wide settings.
#[derive(Clone, Redact, Deserialize)]
#[serde(default)]
pub struct Config {
    pub username: Option<String>,

    #[redact]
    pub password: Option<String>,

    /// Delay before reconnecting after a failed control channel connect.
    pub reconnect_delay_ms: u64,

    /// Port of the zero-conf endpoint, 0 to pick an ephemeral one.
    pub zeroconf_port: u16,

    /// Path the zero-conf endpoint answers on.
    pub zeroconf_path: String,

    #[serde(rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            reconnect_delay_ms: Self::DEFAULT_RECONNECT_DELAY_MS,
            zeroconf_port: 0,
            zeroconf_path: String::from("/spotify_info"),
            devices: Vec::new(),
        }
    }
}

impl Config {
    const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

    /// Configuration files are small: refuse anything bigger to prevent
    /// out-of-memory conditions.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large or does not
    /// parse.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::resource_exhausted(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses the configuration from a TOML string and fills in device
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the string does not parse.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(contents)?;
        for device in &mut config.devices {
            device.resolve();
        }
        Ok(config)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Account credentials when both user name and password are set.
    #[must_use]
    pub fn user_credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials::UserPass {
                    username: username.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Identity and streaming settings of one output device.
#[derive(Clone, Redact, Deserialize)]
pub struct DeviceConfig {
    /// Name as shown to remote clients.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub id: String,

    /// Reusable credentials from an earlier login, if any.
    #[redact]
    #[serde(default)]
    pub credentials: Option<String>,

    /// Address streamers bind to and advertise in their URLs.
    #[serde(default = "unspecified_address")]
    pub address: IpAddr,

    #[serde(default, rename = "bitrate")]
    pub format: AudioFormat,

    #[serde(default = "default_codec")]
    pub codec: String,

    /// Serve all tracks as one continuous stream.
    #[serde(default)]
    pub flow: bool,

    #[serde(default)]
    pub content_length: ContentLength,

    #[serde(default)]
    pub cache_mode: CacheMode,
}

fn unspecified_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_codec() -> String {
    String::from("mp3")
}

impl DeviceConfig {
    /// Creates a device with default settings.
    ///
    /// An empty `name` is replaced by the host name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut device = Self {
            name: name.into(),
            id: String::new(),
            credentials: None,
            address: unspecified_address(),
            format: AudioFormat::default(),
            codec: default_codec(),
            flow: false,
            content_length: ContentLength::default(),
            cache_mode: CacheMode::default(),
        };
        device.resolve();
        device
    }

    /// Fills in the name and id when left empty.
    fn resolve(&mut self) {
        if self.name.is_empty() {
            self.name = sysinfo::System::host_name()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned());
        }

        if self.id.is_empty() {
            self.id = Self::derive_id(&self.name);
            trace!("device id for {}: {}", self.name, self.id);
        }
    }

    /// A device id that is stable across restarts for the same machine and
    /// device name.
    fn derive_id(name: &str) -> String {
        let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, env!("CARGO_PKG_NAME").as_bytes());
        let seed = match machine_uid::get() {
            Ok(machine_id) => format!("{machine_id}/{name}"),
            Err(e) => {
                warn!("could not get machine id, deriving device id from name only: {e}");
                name.to_owned()
            }
        };

        Uuid::new_v5(&namespace, seed.as_bytes()).simple().to_string()
    }

    /// Content length the streamers of this device are created with.
    #[must_use]
    pub fn session_content_length(&self) -> ContentLength {
        self.content_length.for_session(self.flow)
    }

    /// Stored credentials, if configured and non-empty.
    #[must_use]
    pub fn stored_credentials(&self) -> Option<Credentials> {
        self.credentials
            .as_ref()
            .filter(|json| !json.is_empty())
            .map(|json| Credentials::Stored(json.clone()))
    }
}
