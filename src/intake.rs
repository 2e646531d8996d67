//! Intake of links delivered by the operating system.
//!
//! Links arrive in two ways: the link the process was launched with, and
//! links delivered while it runs. Both go through the same steps:
//!
//! 1. The raw link is recorded as a breadcrumb.
//! 2. Links that are not Odesli links stop here.
//! 3. The link is recorded as the last recognized link.
//! 4. If a preferred platform is set, the link is handed to a redirect
//!    [`Controller`]. Otherwise it is only recorded, and the user can pick a
//!    platform first.
//!
//! The launch link and the first live delivery can be the same link. The
//! current controller ignores a link it already took on, so such a link is
//! redirected once.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::{
    breadcrumbs::{Breadcrumbs, Snapshot},
    config::Config,
    error::{Error, Result},
    events::Event,
    link::CandidateLink,
    platform,
    preference::Preferences,
    redirect::{Controller, State},
    resolver::Resolver,
    shell::Shell,
    storage::{Key, Storage},
};

/// What the home screen shows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub preferred: Option<String>,
    /// Last recognized link as it was received, before percent-decoding.
    pub last_link: Option<String>,
    pub breadcrumbs: Snapshot,
}

impl Status {
    #[must_use]
    pub fn preferred_name(&self) -> &'static str {
        platform::display_name(self.preferred.as_deref())
    }
}

pub struct Intake {
    config: Config,
    storage: Arc<dyn Storage>,
    breadcrumbs: Breadcrumbs,
    preferences: Arc<Preferences>,
    resolver: Arc<Resolver>,
    shell: Arc<dyn Shell>,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
    controller: Option<Controller>,
}

impl Intake {
    /// Link resolved by [`test_link_handling`](Self::test_link_handling).
    pub const TEST_LINK: &'static str = "https://song.link/s/4cOdK2wGLETKBW3PvgPWqT";

    /// Creates an intake persisting to `storage` and opening links through
    /// `shell`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be created.
    pub fn new(config: &Config, storage: Arc<dyn Storage>, shell: Arc<dyn Shell>) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            breadcrumbs: Breadcrumbs::new(Arc::clone(&storage)),
            preferences: Arc::new(Preferences::new(Arc::clone(&storage))),
            resolver: Arc::new(Resolver::new(config, Arc::clone(&storage))?),
            storage,
            shell,
            event_tx: None,
            controller: None,
        })
    }

    /// Registers a channel for the events of every redirect.
    pub fn register(&mut self, event_tx: mpsc::UnboundedSender<Event>) {
        self.event_tx = Some(event_tx);
    }

    #[must_use]
    pub fn preferences(&self) -> &Arc<Preferences> {
        &self.preferences
    }

    #[must_use]
    pub fn shell(&self) -> &dyn Shell {
        self.shell.as_ref()
    }

    /// The controller of the most recent redirect.
    #[must_use]
    pub fn controller(&self) -> Option<&Controller> {
        self.controller.as_ref()
    }

    /// Handles the link the process was launched with, if any.
    pub async fn launch(&mut self, url: Option<&str>) -> Option<State> {
        let url = url?;
        info!("launched with {url}");
        self.breadcrumbs.record(Key::InitialLaunchUrl, url).await;

        self.receive(url).await
    }

    /// Handles a link delivered while running.
    ///
    /// Returns the state the redirect ended in, or `None` when no redirect
    /// was started.
    pub async fn receive(&mut self, url: &str) -> Option<State> {
        debug!("received {url}");
        self.breadcrumbs.record(Key::LastReceivedLink, url).await;

        let candidate = CandidateLink::new(url);
        if !candidate.is_recognized() {
            return None;
        }
        self.breadcrumbs
            .record(Key::LastRecognizedLink, candidate.raw())
            .await;

        if self.preferences.get().await.is_none() {
            info!("no preferred platform set, not redirecting {candidate}");
            return None;
        }

        if let Some(ref controller) = self.controller {
            if controller.has_processed(&candidate) {
                debug!("already redirected {candidate}");
                return None;
            }
        }

        let controller = self.new_controller();
        let controller = self.controller.insert(controller);
        Some(controller.run(candidate).await)
    }

    /// Handles the launch link and then every link from `links` until the
    /// stream ends.
    pub async fn listen<S>(&mut self, launch: Option<&str>, links: S)
    where
        S: Stream<Item = String>,
    {
        self.launch(launch).await;

        tokio::pin!(links);
        while let Some(url) = links.next().await {
            let url = url.trim();
            if !url.is_empty() {
                self.receive(url).await;
            }
        }
    }

    /// Runs [`TEST_LINK`](Self::TEST_LINK) through the redirect flow.
    ///
    /// Any remembered resolution is forgotten first, so the test always
    /// queries the API.
    ///
    /// # Errors
    ///
    /// Will return `Err` if no preferred platform is set.
    pub async fn test_link_handling(&mut self) -> Result<State> {
        if self.preferences.get().await.is_none() {
            return Err(Error::failed_precondition(
                "please select a preferred platform first",
            ));
        }

        self.breadcrumbs.record(Key::TestMode, "true").await;
        self.resolver.forget().await;

        let controller = self.new_controller();
        let controller = self.controller.insert(controller);
        let state = controller.run(CandidateLink::new(Self::TEST_LINK)).await;

        if let Err(e) = self.storage.remove(Key::TestMode).await {
            warn!("could not leave test mode: {e}");
        }

        Ok(state)
    }

    /// Collects what the home screen shows.
    pub async fn status(&self) -> Status {
        let breadcrumbs = self.breadcrumbs.snapshot().await;
        Status {
            preferred: self.preferences.get().await,
            last_link: breadcrumbs.get(Key::LastRecognizedLink).map(ToOwned::to_owned),
            breadcrumbs,
        }
    }

    /// Clears all debug data. The preferred platform is kept.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the storage backend fails.
    pub async fn clear_debug_data(&self) -> Result<()> {
        self.breadcrumbs.clear_all().await
    }

    fn new_controller(&self) -> Controller {
        let mut controller = Controller::new(
            &self.config,
            Arc::clone(&self.resolver),
            Arc::clone(&self.preferences),
            Arc::clone(&self.shell),
        );
        if let Some(ref event_tx) = self.event_tx {
            controller.register(event_tx.clone());
        }
        controller
    }
}
