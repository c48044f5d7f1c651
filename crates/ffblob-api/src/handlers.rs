//! Request handlers.

pub mod health;
pub mod transcode;

pub use health::*;
pub use transcode::*;
