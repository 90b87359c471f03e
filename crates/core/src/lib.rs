//! Core data types for the futures price fetcher.

pub mod exchange;
pub mod opportunity;
pub mod quote;

pub use exchange::*;
pub use opportunity::*;
pub use quote::*;
