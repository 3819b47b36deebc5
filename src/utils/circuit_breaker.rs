use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Wraps calls to a best-effort collaborator. After `failure_threshold`
// consecutive failures the circuit opens and calls are refused without
// running. Once `cool_down` has passed the next call is let through as a
// trial: success closes the circuit, failure opens it for another round.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Value reported on the circuit breaker gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit is open")]
    Open,
    #[error("call failed: {0}")]
    Failed(E),
}

struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    circuit: Mutex<Circuit>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuit: Mutex::new(Circuit {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.circuit.lock().await.state
    }

    pub async fn call<T, E>(&self, operation: impl Future<Output = Result<T, E>>) -> Result<T, BreakerError<E>> {
        if !self.admit().await {
            return Err(BreakerError::Open);
        }

        let result = operation.await;
        let mut circuit = self.circuit.lock().await;
        match result {
            Ok(value) => {
                if circuit.state != CircuitState::Closed {
                    tracing::info!("Circuit closed after a successful trial call");
                }
                circuit.state = CircuitState::Closed;
                circuit.consecutive_failures = 0;
                circuit.opened_at = None;
                Ok(value)
            }
            Err(e) => {
                circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                let trip = circuit.state == CircuitState::HalfOpen
                    || circuit.consecutive_failures >= self.config.failure_threshold;
                if trip && circuit.state != CircuitState::Open {
                    tracing::warn!(failures = circuit.consecutive_failures, "Circuit opened");
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                }
                Err(BreakerError::Failed(e))
            }
        }
    }

    async fn admit(&self) -> bool {
        let mut circuit = self.circuit.lock().await;
        if circuit.state != CircuitState::Open {
            return true;
        }
        let cooled = circuit
            .opened_at
            .map(|at| at.elapsed() >= self.config.cool_down)
            .unwrap_or(true);
        if cooled {
            circuit.state = CircuitState::HalfOpen;
        }
        cooled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, cool_down: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold,
            cool_down,
        })
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let breaker = breaker(3, Duration::from_secs(60));

        let _ = breaker.call(async { Err::<(), _>("down") }).await;
        let _ = breaker.call(async { Ok::<_, &str>(()) }).await;
        for _ in 0..2 {
            let _ = breaker.call(async { Err::<(), _>("down") }).await;
        }
        // the success in between reset the count
        assert_eq!(breaker.state().await, CircuitState::Closed);

        let _ = breaker.call(async { Err::<(), _>("down") }).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.state().await.as_gauge(), 1);

        let refused = breaker.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(refused, Err(BreakerError::Open)));
    }

    #[tokio::test]
    async fn test_trial_call_after_cool_down() {
        let breaker = breaker(1, Duration::from_millis(30));
        let _ = breaker.call(async { Err::<(), _>("down") }).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = breaker.call(async { Err::<(), _>("still down") }).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(breaker.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
