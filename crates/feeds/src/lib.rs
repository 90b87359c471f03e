//! Real-time futures price feeds.
//!
//! One connection supervisor per venue drives a venue-specific codec that
//! translates the wire dialect into canonical quotes.

pub mod codec;
pub mod config;
pub mod error;
pub mod router;
pub mod supervisor;

pub use codec::*;
pub use config::*;
pub use error::*;
pub use router::*;
pub use supervisor::*;
