// =============================================================================
// lib.rs — library surface for the filing watch engine
// =============================================================================
//
// `main.rs` is a thin binary that wires these modules together through
// `AppContext` and drives the tokio runtime; everything that does the actual
// work lives here so it's reachable from integration tests under `tests/`
// without going through a live process.
// =============================================================================

pub mod analysis;
pub mod circuit_breaker;
pub mod config;
pub mod edgar;
pub mod error;
pub mod metrics;
pub mod models;
pub mod poller;
pub mod price;
pub mod queue;
pub mod rate_limiter;
pub mod store;
