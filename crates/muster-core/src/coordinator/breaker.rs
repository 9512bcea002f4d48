//! Circuit breaker with first-cause semantics.
//!
//! A cycle accumulates at most one fault: the first one recorded wins and
//! later faults are dropped, so the reported reason always names the
//! earliest point of failure. The breaker never resets within a cycle;
//! a fresh cycle gets a fresh breaker.

use super::ReadinessVerdict;

/// A condition that trips the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerFault {
    /// The readiness evaluator returned a non-ready verdict.
    SystemicVerdict { verdict: ReadinessVerdict },
    /// The pre-execution scan flagged a problem.
    PreScanError,
    /// The worker ran and exited non-zero.
    WorkerExit { code: i32 },
    /// The post-execution scan flagged a problem.
    PostScanError,
}

impl BreakerFault {
    /// The reason string recorded in coordinator state.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::SystemicVerdict { verdict } => {
                format!("systemic_verdict={}", verdict.as_str())
            },
            Self::PreScanError => "pre_scan_error".to_string(),
            Self::WorkerExit { code } => format!("worker_exit_{code}"),
            Self::PostScanError => "post_scan_error".to_string(),
        }
    }
}

/// One cycle's fault accumulator.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CircuitBreaker {
    fault: Option<BreakerFault>,
}

impl CircuitBreaker {
    /// An untripped breaker.
    #[must_use]
    pub const fn new() -> Self {
        Self { fault: None }
    }

    /// Records a fault unless one is already held. Returns whether this
    /// fault became the cause.
    pub fn record(&mut self, fault: BreakerFault) -> bool {
        if self.fault.is_some() {
            tracing::debug!(
                dropped = %fault.reason(),
                held = %self.reason().unwrap_or_default(),
                "breaker already tripped, later fault dropped"
            );
            return false;
        }
        tracing::warn!(reason = %fault.reason(), "circuit breaker tripped");
        self.fault = Some(fault);
        true
    }

    /// Whether a fault has been recorded.
    #[must_use]
    pub const fn is_tripped(&self) -> bool {
        self.fault.is_some()
    }

    /// The recorded fault, if any.
    #[must_use]
    pub const fn fault(&self) -> Option<&BreakerFault> {
        self.fault.as_ref()
    }

    /// The recorded reason string, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.fault.as_ref().map(BreakerFault::reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_breaker_is_quiet() {
        let breaker = CircuitBreaker::new();
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.reason(), None);
        assert_eq!(breaker.fault(), None);
    }

    #[test]
    fn first_fault_wins() {
        let mut breaker = CircuitBreaker::new();
        assert!(breaker.record(BreakerFault::SystemicVerdict {
            verdict: ReadinessVerdict::Review,
        }));
        assert!(!breaker.record(BreakerFault::WorkerExit { code: 3 }));
        assert!(!breaker.record(BreakerFault::PostScanError));
        assert_eq!(breaker.reason().as_deref(), Some("systemic_verdict=review"));
    }

    #[test]
    fn reason_strings_are_stable() {
        assert_eq!(
            BreakerFault::SystemicVerdict {
                verdict: ReadinessVerdict::Hold,
            }
            .reason(),
            "systemic_verdict=hold"
        );
        assert_eq!(BreakerFault::PreScanError.reason(), "pre_scan_error");
        assert_eq!(BreakerFault::WorkerExit { code: 17 }.reason(), "worker_exit_17");
        assert_eq!(BreakerFault::PostScanError.reason(), "post_scan_error");
    }
}
