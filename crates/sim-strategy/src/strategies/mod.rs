mod basic;
mod below_above;
mod breakout;
mod fib_momentum;

pub use basic::BasicStrategy;
pub use below_above::BelowAboveStrategy;
pub use breakout::DonchianBreakoutStrategy;
pub use fib_momentum::FibMomentumStrategy;
