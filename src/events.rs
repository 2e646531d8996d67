//! Events emitted by the redirect flow for the presentation layer.
//!
//! The current [`State`](crate::redirect::State) of a redirect is published
//! through a watch channel. Events cover what happens after a terminal state
//! was reached: the countdown on the error screen and the signal to return
//! to the main screen.
//!
//! # Example
//!
//! ```rust
//! use music_link_handler::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Countdown(seconds) => println!("Returning to home in {seconds} seconds..."),
//!         Event::ReturnToMain => println!("Back to the main screen"),
//!     }
//! }
//! ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Seconds left before returning to the main screen.
    ///
    /// Emitted once when the error screen is shown and then on every tick of
    /// the countdown.
    Countdown(u8),

    /// The redirect screen should be dismissed.
    ///
    /// Emitted a short while after the destination was opened, or when the
    /// error countdown runs out.
    ReturnToMain,
}
