//! Write side of the bridge: encodes events as protocol lines and sends them
//! in batches from a bounded queue over an auto-reconnecting connection.

pub mod error;
pub mod line;
pub mod queue;
pub mod transport;
pub mod writer;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(test)]
mod tests;

pub use error::*;
pub use line::*;
pub use queue::*;
pub use transport::*;
pub use writer::*;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::*;
