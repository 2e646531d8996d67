//! Stopping `listen` from the outside.
//!
//! Listening for links runs until standard input closes, which may be never
//! when links are piped in from a long-lived process. A [`Handler`] lets the
//! listener race the link stream against the signals that should end it:
//!
//! ```no_run
//! use music_link_handler::signal::Handler;
//!
//! async fn listen_until_stopped(links: impl std::future::Future<Output = ()>) {
//!     let mut signals = Handler::new().unwrap();
//!     tokio::select! {
//!         stop = signals.recv() => log::info!("stopped listening on {stop}"),
//!         () = links => log::info!("no more links"),
//!     }
//! }
//! ```
//!
//! Windows only knows Ctrl-C. Elsewhere, SIGTERM and SIGHUP stop the
//! listener too, the latter because links cannot arrive on a closed
//! terminal.

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StopSignal {
    CtrlC,
    Terminate,
    Hangup,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CtrlC => "Ctrl+C",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
        })
    }
}

/// Registered listeners for the stop signals.
///
/// Registering early matters: a signal that arrives before registration
/// takes the default action and kills the process.
pub struct Handler {
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(unix)]
    hangup: Signal,
}

impl Handler {
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        let handler = Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        };

        #[cfg(not(unix))]
        let handler = Self {};

        Ok(handler)
    }

    /// Resolves with the first stop signal received.
    pub async fn recv(&mut self) -> StopSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => StopSignal::CtrlC,
                _ = self.terminate.recv() => StopSignal::Terminate,
                _ = self.hangup.recv() => StopSignal::Hangup,
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot wait for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
            StopSignal::CtrlC
        }
    }
}
