//! The session thread of a player.
//!
//! Runs control sessions back to back while the player lives: pick
//! credentials, connect, authenticate, then pump control messages until the
//! remote side lets go. Credentials are tried in this order:
//!
//! 1. user name and password from the global configuration
//! 2. stored credentials of the device
//! 3. credentials handed over through zero-conf
//!
//! Nothing in here is fatal. Failures are logged and the loop tries again.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError},
    thread,
};

use crate::{
    config::Credentials,
    error::Result,
    player::{self, Flags, Inner, LinkState},
    registry::SessionId,
    remote::{ControlChannel, DataCallback},
};

pub(crate) fn run(inner: &Arc<Inner>, id: SessionId) {
    let name = inner.device.name.clone();

    let mut zeroconf = false;
    let configured = if let Some(credentials) = inner.config.user_credentials() {
        info!("user/password mode for <{name}>");
        Some(credentials)
    } else if let Some(credentials) = inner.device.stored_credentials() {
        info!("reusable credentials mode for <{name}>");
        Some(credentials)
    } else {
        None
    };

    if configured.is_some() {
        *inner.credentials.lock().unwrap_or_else(PoisonError::into_inner) = configured;
    } else {
        zeroconf = true;
        enable_zeroconf(inner);
    }

    while inner.is_running() {
        // With zero-conf a session starts once a client hands over
        // credentials.
        if zeroconf {
            inner.client_connected.wait();
        }

        // Teardown wakes the wait, too.
        if !inner.is_running() {
            break;
        }

        let credentials = inner
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(credentials) = credentials else {
            continue;
        };

        inner.link.store(LinkState::Linked);
        info!("control channel launched for <{name}>");

        let channel = match open(inner, &credentials) {
            Ok(channel) => channel,
            Err(e) => {
                if e.is_transient() {
                    warn!("access point connect error <{e}> (try again later)");
                } else {
                    error!("access point connect error <{e}> (try again later)");
                }
                thread::sleep(inner.config.reconnect_delay());
                continue;
            }
        };

        match channel.authenticate() {
            Ok(auth_data) if !auth_data.is_empty() => {
                serve(inner, id, &channel, zeroconf);
                info!("disconnecting player <{name}>");
            }
            Ok(_) => {
                error!("failed authentication, forcing zero-conf");
                zeroconf = true;
                enable_zeroconf(inner);
            }
            Err(e) => {
                error!("failed authentication ({e}), forcing zero-conf");
                zeroconf = true;
                enable_zeroconf(inner);
            }
        }
    }

    info!("terminating player <{name}>");
}

fn open(inner: &Inner, credentials: &Credentials) -> Result<Arc<dyn ControlChannel>> {
    let channel = inner.backend.connector.open(&inner.device, credentials)?;
    channel.connect()?;
    Ok(channel)
}

fn enable_zeroconf(inner: &Inner) {
    if let Err(e) = inner.enable_zeroconf() {
        error!("could not start zero-conf for <{}>: {e}", inner.device.name);
    }
}

/// Runs an authenticated control session until it ends.
fn serve(inner: &Inner, id: SessionId, channel: &Arc<dyn ControlChannel>, zeroconf: bool) {
    {
        let _guard = inner.lock.lock();
        inner.sink.credentials(&channel.credentials_json());
    }

    inner.set_channel(Some(Arc::clone(channel)));
    channel.set_data_callback(Some(data_callback(Arc::clone(&inner.flags), id)));

    pump(inner, &**channel, zeroconf);

    channel.set_data_callback(None);
    channel.disconnect();
    inner.set_channel(None);
}

fn data_callback(flags: Arc<Flags>, id: SessionId) -> DataCallback {
    Box::new(move |data, track_key| player::write_audio(&flags, id, data, track_key))
}

/// Processes control messages while linked. Ends on an abort, on a
/// disconnect in zero-conf mode and on any error.
fn pump(inner: &Inner, channel: &dyn ControlChannel, zeroconf: bool) {
    while inner.is_running() && inner.link.load() == LinkState::Linked {
        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            for event in channel.handle_packet()? {
                trace!("control event {event:?}");
                let mut guard = inner.lock.lock();
                inner.dispatch(&mut guard.state, event);
                inner.sync_flags(&guard.state);
            }
            Ok(())
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("session error: {e}");
                inner.link.store(LinkState::Disconnecting);
                break;
            }
            Err(payload) => {
                error!("session error: {}", panic_message(&*payload));
                inner.link.store(LinkState::Disconnecting);
                break;
            }
        }

        // Stored credentials keep the device available to the account.
        if !zeroconf {
            inner
                .link
                .transition(LinkState::Disconnecting, LinkState::Linked);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
