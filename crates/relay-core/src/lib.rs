//! relay-core: shared types, wire constants, errors and configuration.
//! All other relay crates depend on this one.

pub mod config;
pub mod error;
pub mod recent;
pub mod wire;

pub use error::RelayError;
pub use recent::{ErrorEntry, RecentErrors};
pub use wire::DiscoveryMessage;
