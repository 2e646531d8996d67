//! Redirects Odesli share links to the user's preferred streaming platform.
//!
//! Odesli links (`song.link`, `album.link` and friends) point to a landing
//! page listing a song or album on every platform. This crate takes such a
//! link, asks the Odesli API for the matching link on the platform the user
//! prefers, and opens that instead.
//!
//! The pieces, from the outside in:
//!
//! * [`intake`] receives links from the operating system and decides whether
//!   to redirect them.
//! * [`redirect`] runs one redirect and publishes its [`State`](redirect::State).
//! * [`resolver`] talks to the Odesli API and remembers the last resolution.
//! * [`preference`] persists the preferred platform, [`breadcrumbs`] the
//!   diagnostic trail.
//! * [`storage`] and [`shell`] are the seams to the platform: a key-value
//!   store and a way to open URLs.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate log;

pub mod breadcrumbs;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod intake;
pub mod link;
pub mod platform;
pub mod preference;
pub mod redirect;
pub mod resolver;
pub mod shell;
pub mod signal;
pub mod storage;
