// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - identity:  Security server descriptors
// - cursor:    Persisted per-server continuation positions
// - collector: Task queue, fetch operation and worker pool
// - xroad:     Monitoring query protocol (SOAP + attachment)
// - sink:      Rotating per-server record logs
// - heartbeat: Run status file for external monitoring
//
pub mod collector;
pub mod config;
pub mod cursor;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod metrics;
pub mod schema;
pub mod sink;
pub mod util;
pub mod xroad;
