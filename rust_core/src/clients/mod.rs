pub mod battlemetrics;
pub mod retry;

// Re-export commonly used types
pub use battlemetrics::{BattleMetricsClient, BattleMetricsConfig, DEFAULT_BASE_URL};
pub use retry::{execute_with_retry, RetryPolicy};
