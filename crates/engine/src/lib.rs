//! Shared price state and derived analytics.
//!
//! The price book is the single source of truth for current quotes. Feeds
//! push into it; it publishes events outward and never calls back into a
//! supervisor.

pub mod book;
pub mod detector;
pub mod error;
pub mod events;
pub mod reaper;
pub mod service;

pub use book::*;
pub use detector::*;
pub use error::*;
pub use events::*;
pub use reaper::*;
pub use service::*;
