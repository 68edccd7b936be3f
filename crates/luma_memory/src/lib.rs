pub mod aggregator;
pub mod faults;
pub mod fixture;
pub mod store;

pub use aggregator::StateAggregator;
pub use faults::{Fault, FaultyTelemetry};
pub use fixture::SessionFixture;
pub use store::{InMemoryTelemetry, InteractionRecord, ServeRecord, TelemetryConfig};
