//! Calendar integration (Google Calendar v3)
//!
//! The engine's typed event and metadata model is translated to the remote
//! wire format here and nowhere else.

pub mod google;
mod metadata;
mod wire;

pub use google::{GoogleCalendarClient, GoogleCalendarConnector};
