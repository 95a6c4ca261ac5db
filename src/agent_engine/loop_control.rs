use tokio_util::sync::CancellationToken;

use crate::agent_engine::state::{AbortReason, LoopConfig};

/// Iteration and failure budgets for one run, plus its cancellation signal.
pub struct LoopController {
    max_iterations: u32,
    max_failures: u32,
    iterations: u32,
    consecutive_failures: u32,
    cancel: CancellationToken,
}

impl LoopController {
    pub fn new(config: &LoopConfig, cancel: CancellationToken) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_failures: config.max_consecutive_backend_failures.max(1),
            iterations: 0,
            consecutive_failures: 0,
            cancel,
        }
    }

    /// Claim the next iteration, or say why the run must stop.
    /// Cancellation is only observed here, between iterations.
    pub fn next_iteration(&mut self) -> Result<u32, AbortReason> {
        if self.cancel.is_cancelled() {
            return Err(AbortReason::Cancelled);
        }
        if self.iterations >= self.max_iterations {
            return Err(AbortReason::IterationBudget);
        }
        self.iterations += 1;
        Ok(self.iterations)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Count a backend failure; true once the consecutive limit is reached.
    pub fn record_backend_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= self.max_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_backend_success(&mut self) {
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_iterations: u32, failures: u32) -> LoopConfig {
        LoopConfig {
            max_iterations,
            max_consecutive_backend_failures: failures,
            ..LoopConfig::default()
        }
    }

    #[test]
    fn budget_is_exact() {
        let mut ctl = LoopController::new(&config(2, 3), CancellationToken::new());
        assert_eq!(ctl.next_iteration(), Ok(1));
        assert_eq!(ctl.next_iteration(), Ok(2));
        assert_eq!(ctl.next_iteration(), Err(AbortReason::IterationBudget));
        assert_eq!(ctl.iterations(), 2);
    }

    #[test]
    fn cancellation_wins_over_budget() {
        let token = CancellationToken::new();
        let mut ctl = LoopController::new(&config(5, 3), token.clone());
        ctl.next_iteration().unwrap();
        token.cancel();
        assert_eq!(ctl.next_iteration(), Err(AbortReason::Cancelled));
    }

    #[test]
    fn failures_reset_on_success() {
        let mut ctl = LoopController::new(&config(10, 2), CancellationToken::new());
        assert!(!ctl.record_backend_failure());
        ctl.record_backend_success();
        assert!(!ctl.record_backend_failure());
        assert!(ctl.record_backend_failure());
    }
}
