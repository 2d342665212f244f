//! Funding-rate strategy: market scan, entry scheduling and the post-fill
//! order lifecycle.

pub mod breakeven;
pub mod lifecycle;
pub mod protective;
pub mod scanner;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use breakeven::{run_breakeven_watch, BreakevenWatch, WatchStep};
pub use lifecycle::{LifecycleCoordinator, LifecycleSettings};
pub use protective::{protective_levels, protective_orders};
pub use scanner::{rank_candidates, MarketScanner};
pub use scheduler::{
    entry_quantity, entry_wake_time_ms, Clock, IterationOutcome, SchedulerSettings, SystemClock,
    TradingScheduler,
};
