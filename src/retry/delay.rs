use std::time::Duration;

/// How long to wait after a failed attempt before the next one.
///
/// Both variants are pure functions of the 1-based index of the attempt
/// that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    /// `(attempt - 1) * base`: the first retry is immediate, each later one
    /// waits one more `base` step.
    SteppedLinear { base_ms: u64 },
    /// `2^attempt * base`: the first retry already waits `2 * base`.
    Exponential { base_ms: u64 },
}

impl DelayPolicy {
    /// Delay to await after attempt `attempt` (1-based) has failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match *self {
            DelayPolicy::SteppedLinear { base_ms } => {
                base_ms.saturating_mul(u64::from(attempt.saturating_sub(1)))
            }
            DelayPolicy::Exponential { base_ms } => {
                let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms)
    }
}

impl std::fmt::Display for DelayPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelayPolicy::SteppedLinear { base_ms } => write!(f, "stepped-linear({base_ms}ms)"),
            DelayPolicy::Exponential { base_ms } => write!(f, "exponential({base_ms}ms)"),
        }
    }
}
