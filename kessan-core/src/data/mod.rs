//! Data providers: traits, the J-Quants client, and in-memory fixtures

pub mod circuit_breaker;
pub mod jquants;
pub mod memory;
pub mod provider;

pub use circuit_breaker::{BreakerPolicy, CircuitBreaker, TripReason};
pub use jquants::JQuantsClient;
pub use memory::InMemoryProvider;
pub use provider::{DataError, ListedInfoProvider, PriceProvider, StatementProvider};
