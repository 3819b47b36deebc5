pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use retry::{retry_on_transient, IsTransient, RetryConfig, RetryResult};
