//! Zero-configuration login.
//!
//! Without configured credentials, or after they were refused, a session
//! waits for a remote client to hand over credentials. The client finds the
//! device through an mDNS advertisement of `_spotify-connect._tcp` and talks
//! to a small HTTP endpoint:
//!
//! * `GET <path>` answers with the device description
//! * `POST <path>` carries the credentials as an urlencoded form
//!
//! Received credentials are passed to a [`Handler`], which wakes the session.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use http::{Method, StatusCode};
use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::error::{Error, Result};

/// Service type advertised over mDNS.
pub const SERVICE_TYPE: &str = "_spotify-connect._tcp.local.";

const ACCEPT_IDLE: Duration = Duration::from_millis(30);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(120);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Request bodies are small forms; refuse anything bigger.
const MAX_BODY_SIZE: usize = 16 * 1024;

/// Receives what clients send to the endpoint.
pub trait Handler: Send + Sync {
    /// Device description returned to `GET` requests.
    fn info(&self) -> serde_json::Value;

    /// Credentials form posted by a client.
    fn add_user(&self, form: HashMap<String, String>);
}

/// A running zero-conf endpoint and its advertisement.
pub struct ZeroConf {
    port: u16,
    shutdown: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
    mdns: Option<(ServiceDaemon, String)>,
}

impl ZeroConf {
    /// Starts listening on `port`, 0 for an ephemeral one, and advertises the
    /// endpoint as `name`.
    ///
    /// A failing mDNS advertisement is logged but not fatal: clients that
    /// know the address can still log in.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be set up.
    pub fn start(name: &str, port: u16, path: &str, handler: Arc<dyn Handler>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        info!("zero-conf mode (port {port})");

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread = {
            let shutdown = Arc::clone(&shutdown);
            let path = path.to_owned();
            thread::Builder::new()
                .name(format!("zeroconf {port}"))
                .spawn(move || serve(&listener, &path, &*handler, &shutdown))?
        };

        let mdns = match advertise(name, port, path) {
            Ok(mdns) => Some(mdns),
            Err(e) => {
                warn!("could not advertise {name} over mdns: {e}");
                None
            }
        };

        Ok(Self {
            port,
            shutdown,
            listener: Some(thread),
            mdns,
        })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Withdraws the advertisement and stops the endpoint.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some((daemon, fullname)) = self.mdns.take() {
            if let Err(e) = daemon.unregister(&fullname) {
                warn!("could not unregister {fullname}: {e}");
            }
            if let Err(e) = daemon.shutdown() {
                debug!("mdns daemon shutdown: {e}");
            }
        }

        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.listener.take() {
            if thread.join().is_err() {
                error!("zero-conf listener on port {} panicked", self.port);
            }
        }
    }
}

impl Drop for ZeroConf {
    fn drop(&mut self) {
        self.stop();
    }
}

fn advertise(name: &str, port: u16, path: &str) -> Result<(ServiceDaemon, String)> {
    let daemon = ServiceDaemon::new()?;

    let host = sysinfo::System::host_name()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned());
    let host_name = format!("{}.local.", host.replace(['.', ' '], "-"));

    let properties = [("VERSION", "1.0"), ("CPath", path), ("Stack", "SP")];
    let service = ServiceInfo::new(SERVICE_TYPE, name, &host_name, "", port, &properties[..])?
        .enable_addr_auto();
    let fullname = service.get_fullname().to_owned();

    daemon.register(service)?;
    debug!("advertising {fullname} on port {port}");

    Ok((daemon, fullname))
}

fn serve(listener: &TcpListener, path: &str, handler: &dyn Handler, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = handle_connection(stream, path, handler) {
                    debug!("zero-conf request from {peer} failed: {e}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
            Err(e) => {
                warn!("zero-conf accept failed: {e}");
                thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Request {
    method: Method,
    path: String,
    body: Vec<u8>,
}

fn handle_connection(stream: TcpStream, path: &str, handler: &dyn Handler) -> Result<()> {
    // Accepted sockets inherit the listener's non-blocking mode on some
    // platforms.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let request = parse_request(&mut reader)?;
    let (status, body) = route(&request, path, handler);

    trace!("{} {} -> {status}", request.method, request.path);
    write_response(stream, status, &body)
}

fn route(request: &Request, path: &str, handler: &dyn Handler) -> (StatusCode, serde_json::Value) {
    let target = request
        .path
        .split_once('?')
        .map_or(request.path.as_str(), |(target, _)| target);
    if target != path {
        return (StatusCode::NOT_FOUND, serde_json::Value::Null);
    }

    match request.method {
        Method::GET => (StatusCode::OK, handler.info()),
        Method::POST => {
            if !request.body.is_empty() {
                match parse_form(&request.body) {
                    Ok(form) => handler.add_user(form),
                    Err(e) => {
                        warn!("malformed zero-conf form: {e}");
                        return (StatusCode::BAD_REQUEST, serde_json::Value::Null);
                    }
                }
            }
            (
                StatusCode::OK,
                serde_json::json!({
                    "status": 101,
                    "statusString": "OK",
                    "spotifyError": 0,
                }),
            )
        }
        _ => (StatusCode::METHOD_NOT_ALLOWED, serde_json::Value::Null),
    }
}

fn parse_form(body: &[u8]) -> Result<HashMap<String, String>> {
    Ok(serde_urlencoded::from_bytes(body)?)
}

fn parse_request<R: BufRead>(reader: &mut R) -> Result<Request> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::invalid_argument("empty request"))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| Error::invalid_argument(format!("invalid method {method}: {e}")))?;
    let path = parts
        .next()
        .ok_or_else(|| Error::invalid_argument("missing request path"))?
        .to_owned();

    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }

        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().map_err(|e| {
                    Error::invalid_argument(format!("invalid content length: {e}"))
                })?;
            }
        }
    }

    if content_length > MAX_BODY_SIZE {
        return Err(Error::resource_exhausted(format!(
            "request body too large ({content_length} bytes)"
        )));
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;

    Ok(Request { method, path, body })
}

fn write_response(mut stream: TcpStream, status: StatusCode, body: &serde_json::Value) -> Result<()> {
    let body = if body.is_null() {
        Vec::new()
    } else {
        serde_json::to_vec(body)?
    };

    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&body)?;
    stream.flush()?;

    Ok(())
}
