/// Collector module
///
/// This module groups the collection engine:
/// - `queue`:  shared task queue with drain detection
/// - `fetch`:  one windowed query against one server
/// - `runner`: worker pool and shutdown coordination
///
/// Design notes:
/// - Protocol-specific logic MUST NOT live here (see `xroad`)
/// - Shared state is owned by explicit objects, never globals
pub mod fetch;
pub mod queue;
pub mod runner;

pub use fetch::{FetchOperation, FetchOutcome, FetchSettings};
pub use runner::Collector;
