//! Support code for the `askperm-demo` binary

pub mod scenario;
pub mod tracing_support;

pub use scenario::{run, Answer, Policy, Scenario, StoreLocation, Timing};
pub use tracing_support::{init_subscriber, TracingConfig, TracingFormat};
