//! Read side of the bridge: exposes append-only store tables as live,
//! growing tables to a columnar analytics engine.

pub mod adapters;
pub mod error;
pub mod pager;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod types;
pub mod watcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(test)]
mod tests;

pub use adapters::*;
pub use error::*;
pub use pager::*;
pub use provider::*;
pub use registry::*;
pub use schema::*;
pub use traits::*;
pub use types::*;
pub use watcher::*;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::*;
