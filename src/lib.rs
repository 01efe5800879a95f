//! Bridges a cloud-controlled playback protocol to network renderers.
//!
//! A remote client controls playback through a cloud control channel. The
//! sound is made by a local renderer, e.g. a UPnP media renderer, that pulls
//! audio over HTTP. This crate is the orchestration between the two: it turns
//! control events into renderer commands, keeps the short queue of in-flight
//! audio streams, reconciles the playback positions of both sides and tears
//! sessions down safely while audio may still be arriving.
//!
//! The control channel protocol, the HTTP streamers and the renderer are
//! collaborators behind traits:
//! * [`remote::Connector`] and [`remote::ControlChannel`]
//! * [`streamer::StreamerFactory`] and [`streamer::Streamer`]
//! * [`shadow::ShadowSink`]
//!
//! Start at [`player::Player::create`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod player;
pub mod registry;
pub mod remote;
pub mod shadow;
pub mod streamer;
pub mod track;
pub mod util;
pub mod zeroconf;

mod session;
