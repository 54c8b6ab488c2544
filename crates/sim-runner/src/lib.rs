//! Per-tick runner orchestration.
//!
//! One [`RunnerEngine::run_tick`] call sweeps every active runner against the
//! virtual clock instant: candles are bulk-prefetched per timeframe, armed
//! stops are evaluated before any strategy signal, and the tick's execution
//! rows are buffered and upserted as one idempotent batch.

pub mod engine;
pub mod guards;
pub mod records;

pub use engine::{RunnerEngine, TickStats};
