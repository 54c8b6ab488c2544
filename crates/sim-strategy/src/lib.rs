//! Strategy contract and decision validation.
//!
//! Strategies return their decisions as generic JSON maps (the historical
//! wire shape); the engine never acts on a raw map. [`parse_decision`] is the
//! validating parser from map to the tagged [`Decision`] variant, and a
//! failed parse surfaces as a `skipped-build_failed` execution row rather
//! than a panic or an exception crossing the tick boundary.

pub mod decision;
pub mod explain;
pub mod registry;
pub mod strategies;
pub mod types;

pub use decision::{
    parse_decision, BuyDecision, Decision, DecisionError, NoActionDecision, OrderType,
    SellDecision, StaticStopSpec, TrailStopSpec, ValidationEnv,
};
pub use registry::StrategyRegistry;
pub use types::{DecisionCtx, PositionView, RunnerView, Strategy};
