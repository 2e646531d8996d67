//! The redirect flow for a single link.
//!
//! A [`Controller`] takes one candidate link through these states:
//!
//! ```text
//! Idle -> Loading -> Redirecting -> Opened
//!            |            |
//!            +------------+-------> Error
//! ```
//!
//! * **Loading**: looks up the preferred platform. Without one, the flow
//!   fails before any network activity.
//! * **Redirecting**: resolves the link and asks the operating system to open
//!   the destination.
//! * **Opened**: the destination was handed to the operating system. The
//!   presentation layer is told to return to the main screen after a short
//!   delay, to let the app switch complete.
//! * **Error**: the presentation layer shows the message and a countdown,
//!   after which it is told to return to the main screen.
//!
//! Terminal states are final. The pending return timer is cancelled when the
//! controller is dropped or [`reset`](Controller::reset).

use std::{future::Future, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    config::Config,
    events::Event,
    link::CandidateLink,
    platform,
    preference::Preferences,
    resolver::{self, Resolver},
    shell::Shell,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Idle,
    Loading,
    Redirecting {
        /// Display name of the platform being redirected to.
        platform: String,
    },
    Opened {
        destination: String,
    },
    Error {
        message: String,
    },
}

impl State {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Opened { .. } | Self::Error { .. })
    }

    /// Title of the redirect screen in this state.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Idle | Self::Loading => "Processing Link",
            Self::Redirecting { .. } | Self::Opened { .. } => "Redirecting",
            Self::Error { .. } => "Redirect Error",
        }
    }

    /// Status line of the redirect screen in this state.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Idle | Self::Loading => "Analyzing music link...".to_owned(),
            Self::Redirecting { platform } => format!("Opening in {platform}..."),
            Self::Opened { destination } => format!("Opened {destination}"),
            Self::Error { message } => message.clone(),
        }
    }
}

/// Reasons a redirect fails, worded for the user.
#[derive(Error, Debug)]
pub enum Failure {
    #[error("No URL provided")]
    NoUrl,

    #[error("No preferred music platform set. Please go to Settings to set one.")]
    NoPreference,

    #[error("Could not find a {platform} link for this content")]
    NotFound { platform: String },

    #[error("Error: {0}")]
    Api(#[source] resolver::Error),
}

impl From<resolver::Error> for Failure {
    fn from(e: resolver::Error) -> Self {
        match e {
            resolver::Error::NotFound { platform } => Self::NotFound { platform },
            e => Self::Api(e),
        }
    }
}

/// Delays of the redirect screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Timings {
    open_delay: Duration,
    countdown_ticks: u8,
    countdown_interval: Duration,
}

pub struct Controller {
    resolver: Arc<Resolver>,
    preferences: Arc<Preferences>,
    shell: Arc<dyn Shell>,
    timings: Timings,

    state: watch::Sender<State>,
    event_tx: Option<mpsc::UnboundedSender<Event>>,

    /// Decoded form of the link this controller took on.
    processed: Option<String>,

    /// Cancels the pending return to the main screen when dropped.
    timer: Option<DropGuard>,
}

impl Controller {
    pub fn new(
        config: &Config,
        resolver: Arc<Resolver>,
        preferences: Arc<Preferences>,
        shell: Arc<dyn Shell>,
    ) -> Self {
        let (state, _) = watch::channel(State::Idle);

        Self {
            resolver,
            preferences,
            shell,
            timings: Timings {
                open_delay: config.open_delay,
                countdown_ticks: config.countdown_ticks,
                countdown_interval: config.countdown_interval,
            },
            state,
            event_tx: None,
            processed: None,
            timer: None,
        }
    }

    /// Registers a channel for countdown and navigation events.
    pub fn register(&mut self, event_tx: mpsc::UnboundedSender<Event>) {
        self.event_tx = Some(event_tx);
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state.borrow().clone()
    }

    /// Whether this controller already took on `candidate`.
    #[must_use]
    pub fn has_processed(&self, candidate: &CandidateLink) -> bool {
        self.processed.as_deref() == Some(candidate.decoded())
    }

    /// Returns the controller to `Idle`, cancelling any pending timer.
    pub fn reset(&mut self) {
        if self.timer.take().is_some() {
            trace!("cancelled return timer");
        }
        self.processed = None;
        self.set_state(State::Idle);
    }

    /// Takes `candidate` through the redirect flow and returns the state it
    /// ended in.
    ///
    /// A candidate that was processed before is ignored, as is any candidate
    /// while the controller is not idle.
    pub async fn run(&mut self, candidate: CandidateLink) -> State {
        if self.has_processed(&candidate) {
            debug!("already processed {candidate}, skipping");
            return self.state();
        }

        if self.state() != State::Idle {
            warn!("redirect in progress, ignoring {candidate}");
            return self.state();
        }

        self.processed = Some(candidate.decoded().to_owned());
        debug!("processing {candidate}");

        if candidate.is_empty() {
            return self.fail(Failure::NoUrl);
        }

        self.set_state(State::Loading);
        let Some(platform_key) = self.preferences.get().await else {
            return self.fail(Failure::NoPreference);
        };

        let platform = platform::lookup(&platform_key)
            .map_or_else(|| platform_key.clone(), |platform| platform.name.to_owned());
        self.set_state(State::Redirecting { platform });

        self.resolver.forget_other_than(&candidate).await;
        match self.resolver.resolve(&candidate, &platform_key).await {
            Ok(destination) => self.open(destination).await,
            Err(e) => self.fail(e.into()),
        }
    }

    async fn open(&mut self, destination: String) -> State {
        info!("opening {destination}");

        // The app switch counts as done whatever the handler reports.
        if let Err(e) = self.shell.open_url(&destination).await {
            warn!("could not open {destination}: {e}");
        }

        self.set_state(State::Opened { destination });

        let delay = self.timings.open_delay;
        let event_tx = self.event_tx.clone();
        self.schedule(async move {
            tokio::time::sleep(delay).await;
            emit(event_tx.as_ref(), Event::ReturnToMain);
        });

        self.state()
    }

    fn fail(&mut self, failure: Failure) -> State {
        error!("redirect failed: {failure}");
        self.set_state(State::Error {
            message: failure.to_string(),
        });

        let Timings {
            countdown_ticks: ticks,
            countdown_interval: interval,
            ..
        } = self.timings;
        let event_tx = self.event_tx.clone();
        self.schedule(async move {
            emit(event_tx.as_ref(), Event::Countdown(ticks));
            for remaining in (0..ticks).rev() {
                tokio::time::sleep(interval).await;
                if remaining > 0 {
                    emit(event_tx.as_ref(), Event::Countdown(remaining));
                }
            }
            emit(event_tx.as_ref(), Event::ReturnToMain);
        });

        self.state()
    }

    fn schedule<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = cancelled.cancelled() => trace!("return timer cancelled"),
                () = task => {}
            }
        });

        self.timer = Some(token.drop_guard());
    }

    fn set_state(&self, state: State) {
        if state == State::Idle {
            debug!("redirect state: idle");
        } else {
            info!("{}: {}", state.title(), state.message());
        }
        self.state.send_replace(state);
    }
}

fn emit(event_tx: Option<&mpsc::UnboundedSender<Event>>, event: Event) {
    if let Some(tx) = event_tx {
        if tx.send(event).is_err() {
            trace!("no receiver for {event:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Server, ServerGuard};

    use super::*;
    use crate::{
        resolver::tests::{mock_links, CANDIDATE},
        shell::tests::RecordingShell,
        storage::{Key, MemoryStorage, Storage},
    };

    struct Fixture {
        controller: Controller,
        storage: Arc<MemoryStorage>,
        shell: RecordingShell,
        event_rx: mpsc::UnboundedReceiver<Event>,
    }

    fn config(server: &ServerGuard) -> Config {
        let mut config = Config::new()
            .unwrap()
            .with_api_url(&format!("{}/v1-alpha.1/links", server.url()))
            .unwrap();
        config.open_delay = Duration::from_millis(10);
        config.countdown_interval = Duration::from_millis(10);
        config
    }

    fn fixture(config: &Config, shell: RecordingShell) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = Arc::new(Resolver::new(config, storage.clone()).unwrap());
        let preferences = Arc::new(Preferences::new(storage.clone()));

        let mut controller = Controller::new(config, resolver, preferences, Arc::new(shell.clone()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        controller.register(event_tx);

        Fixture {
            controller,
            storage,
            shell,
            event_rx,
        }
    }

    async fn prefer(fixture: &Fixture, platform: &str) {
        fixture
            .storage
            .set(Key::PreferredPlatform, platform)
            .await
            .unwrap();
    }

    async fn next_event(event_rx: &mut mpsc::UnboundedReceiver<Event>) -> Option<Event> {
        tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn opens_the_preferred_platform() {
        let mut server = Server::new_async().await;
        let mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"appleMusicWeb": {"url": "https://music.apple.com/xyz"}}}"#,
        )
        .create_async()
        .await;

        let mut fixture = fixture(&config(&server), RecordingShell::default());
        prefer(&fixture, "apple_music").await;
        let mut states = fixture.controller.subscribe();

        let state = fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        assert_eq!(
            state,
            State::Opened {
                destination: "https://music.apple.com/xyz".to_owned()
            }
        );
        assert_eq!(*states.borrow_and_update(), state);
        assert_eq!(fixture.shell.opened(), vec!["https://music.apple.com/xyz"]);
        mock.assert_async().await;

        assert_eq!(
            next_event(&mut fixture.event_rx).await,
            Some(Event::ReturnToMain)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fails_without_preference_and_counts_down() {
        // Nothing listens on this endpoint: no request may be made.
        let config = Config::new()
            .unwrap()
            .with_api_url("http://127.0.0.1:9/links")
            .unwrap();
        let mut fixture = fixture(&config, RecordingShell::default());

        let start = tokio::time::Instant::now();
        let state = fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        let State::Error { ref message } = state else {
            panic!("expected error, got {state:?}");
        };
        assert!(message.contains("No preferred music platform"));
        assert!(fixture.shell.opened().is_empty());

        let mut events = Vec::new();
        while let Some(event) = fixture.event_rx.recv().await {
            events.push(event);
            if event == Event::ReturnToMain {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                Event::Countdown(5),
                Event::Countdown(4),
                Event::Countdown(3),
                Event::Countdown(2),
                Event::Countdown(1),
                Event::ReturnToMain,
            ]
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");
    }

    #[tokio::test]
    async fn same_candidate_is_processed_once() {
        let mut server = Server::new_async().await;
        let mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"spotify": {"url": "A"}}}"#,
        )
        .expect(1)
        .create_async()
        .await;

        let mut fixture = fixture(&config(&server), RecordingShell::default());
        prefer(&fixture, "spotify").await;

        let first = fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        let encoded = CandidateLink::new("https%3A%2F%2Fsong.link%2Fs%2Fabc123");
        let second = fixture.controller.run(encoded).await;

        assert_eq!(first, second);
        assert_eq!(fixture.shell.opened(), vec!["A"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn terminal_state_ignores_new_candidates_until_reset() {
        let mut server = Server::new_async().await;
        let _mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"spotify": {"url": "A"}}}"#,
        )
        .create_async()
        .await;

        let mut fixture = fixture(&config(&server), RecordingShell::default());
        prefer(&fixture, "spotify").await;
        fixture.controller.run(CandidateLink::new(CANDIDATE)).await;

        let other = CandidateLink::new("https://album.link/i/1");
        let state = fixture.controller.run(other.clone()).await;
        assert_eq!(
            state,
            State::Opened {
                destination: "A".to_owned()
            }
        );
        assert!(!fixture.controller.has_processed(&other));

        fixture.controller.reset();
        assert_eq!(fixture.controller.state(), State::Idle);
        assert!(!fixture.controller.has_processed(&CandidateLink::new(CANDIDATE)));
    }

    #[tokio::test]
    async fn reports_missing_platform_links() {
        let mut server = Server::new_async().await;
        let _mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"tidal": {"url": "T"}}}"#,
        )
        .create_async()
        .await;

        let mut fixture = fixture(&config(&server), RecordingShell::default());
        prefer(&fixture, "spotify").await;

        let state = fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        assert_eq!(
            state,
            State::Error {
                message: "Could not find a Spotify link for this content".to_owned()
            }
        );
        assert_eq!(
            next_event(&mut fixture.event_rx).await,
            Some(Event::Countdown(5))
        );
    }

    #[tokio::test]
    async fn reports_api_errors() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1-alpha.1/links")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let mut fixture = fixture(&config(&server), RecordingShell::default());
        prefer(&fixture, "spotify").await;

        let state = fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        let State::Error { message } = state else {
            panic!("expected error, got {state:?}");
        };
        assert!(message.starts_with("Error: "), "{message}");
        assert!(message.contains("500"), "{message}");
    }

    #[tokio::test]
    async fn opened_even_when_the_handler_fails() {
        let mut server = Server::new_async().await;
        let _mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"deezer": {"url": "D"}}}"#,
        )
        .create_async()
        .await;

        let shell = RecordingShell {
            fail: true,
            ..RecordingShell::default()
        };
        let mut fixture = fixture(&config(&server), shell);
        prefer(&fixture, "deezer").await;

        let state = fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        assert_eq!(
            state,
            State::Opened {
                destination: "D".to_owned()
            }
        );
        assert_eq!(fixture.shell.opened(), vec!["D"]);
    }

    #[tokio::test]
    async fn stale_resolution_of_another_link_is_not_reused() {
        let mut server = Server::new_async().await;
        let mock = mock_links(
            &mut server,
            r#"{"linksByPlatform": {"spotify": {"url": "fresh"}}}"#,
        )
        .expect(1)
        .create_async()
        .await;

        let mut fixture = fixture(&config(&server), RecordingShell::default());
        prefer(&fixture, "spotify").await;
        fixture
            .storage
            .set(Key::LastResolutionSource, "https://album.link/i/1")
            .await
            .unwrap();
        fixture
            .storage
            .set(Key::LastRedirectDestination, "stale")
            .await
            .unwrap();

        fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        assert_eq!(fixture.shell.opened(), vec!["fresh"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn resolution_of_the_same_link_is_reused() {
        let mut server = Server::new_async().await;
        let mock = mock_links(&mut server, "{}").expect(0).create_async().await;

        let mut fixture = fixture(&config(&server), RecordingShell::default());
        prefer(&fixture, "spotify").await;
        fixture
            .storage
            .set(Key::LastResolutionSource, CANDIDATE)
            .await
            .unwrap();
        fixture
            .storage
            .set(Key::LastRedirectDestination, "cached")
            .await
            .unwrap();

        fixture.controller.run(CandidateLink::new(CANDIDATE)).await;
        assert_eq!(fixture.shell.opened(), vec!["cached"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_link_fails() {
        let server = Server::new_async().await;
        let mut fixture = fixture(&config(&server), RecordingShell::default());

        let state = fixture.controller.run(CandidateLink::new("")).await;
        assert_eq!(
            state,
            State::Error {
                message: "No URL provided".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn teardown_cancels_the_countdown() {
        let server = Server::new_async().await;
        let Fixture {
            mut controller,
            mut event_rx,
            ..
        } = fixture(&config(&server), RecordingShell::default());

        let state = controller.run(CandidateLink::new(CANDIDATE)).await;
        assert!(state.is_terminal());
        drop(controller);

        assert_eq!(next_event(&mut event_rx).await, None);
    }

    #[test]
    fn screen_texts() {
        let redirecting = State::Redirecting {
            platform: "Deezer".to_owned(),
        };
        assert_eq!(redirecting.title(), "Redirecting");
        assert_eq!(redirecting.message(), "Opening in Deezer...");
        assert_eq!(State::Loading.message(), "Analyzing music link...");
        assert!(!State::Loading.is_terminal());
    }
}
