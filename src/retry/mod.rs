mod delay;
mod executor;

pub use delay::DelayPolicy;
pub use executor::{RetryExecutor, RetryPolicy, Sleeper, TokioSleeper};

#[cfg(test)]
pub(crate) use executor::RecordingSleeper;
