//! Realized-P&L KPIs computed from closed trades only.
//!
//! Runner budgets may be unset or stale, so nothing here depends on them:
//! percentages compound per-trade returns, and the per-runner percent is
//! taken against total sell proceeds. All functions are pure; callers load
//! the trade rows and order them by `sell_ts` ascending.

use chrono::{DateTime, Utc};

/// A closed round trip as persisted by the mock broker.
#[derive(Clone, Debug)]
pub struct ClosedTrade {
    pub buy_ts: DateTime<Utc>,
    pub sell_ts: DateTime<Utc>,
    pub sell_price: f64,
    pub quantity: f64,
    pub pnl_amount: f64,
    pub pnl_percent: f64,
}

/// Per-strategy KPI block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrategyKpis {
    pub compounded_pnl_pct: f64,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
}

/// Per-runner roll-up written into `analytics_results`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunnerSummary {
    pub final_pnl_amount: f64,
    pub final_pnl_percent: f64,
    pub trades_count: u64,
    pub avg_pnl_per_trade: f64,
    pub avg_trade_duration_sec: Option<f64>,
}

// ---------------------------------------------------------------------------
// Return series
// ---------------------------------------------------------------------------

/// Per-trade returns as decimals, capped at -100% so compounding can never
/// cross below zero equity.
pub fn return_series(trades: &[ClosedTrade]) -> Vec<f64> {
    trades
        .iter()
        .map(|t| (t.pnl_percent / 100.0).max(-1.0))
        .collect()
}

/// Compounded return over the series, expressed as percent:
/// `(∏(1 + r_i) - 1) × 100`.
pub fn compounded_return_pct(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let product: f64 = returns.iter().map(|r| 1.0 + r).product();
    (product - 1.0) * 100.0
}

/// `Σ wins / |Σ losses|`. With no losses the factor is undefined; it is
/// reported as 0 (UI keeps a bounded axis either way).
pub fn profit_factor(trades: &[ClosedTrade]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl_amount > 0.0).map(|t| t.pnl_amount).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl_amount < 0.0)
        .map(|t| t.pnl_amount)
        .sum::<f64>()
        .abs();

    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        0.0
    }
}

/// Max drawdown (percent) of the normalized equity curve
/// `E_k = ∏_{i≤k}(1 + r_i)` against its running peak.
pub fn max_drawdown_pct(returns: &[f64]) -> f64 {
    let mut equity = 1.0f64;
    let mut peak = 1.0f64;
    let mut max_dd = 0.0f64;

    for r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        }
        let dd = if peak > 0.0 { (peak - equity) / peak } else { 0.0 };
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd * 100.0
}

/// Annualized Sharpe over per-trade returns, risk-free rate 0:
/// `mean(r) / stdev(r, ddof=1) × √252`. Zero when undefined.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std > 0.0 {
        (mean / std) * 252.0f64.sqrt()
    } else {
        0.0
    }
}

/// Full KPI block for one strategy's trades (ordered by `sell_ts`).
pub fn compute_kpis(trades: &[ClosedTrade]) -> StrategyKpis {
    let returns = return_series(trades);
    StrategyKpis {
        compounded_pnl_pct: compounded_return_pct(&returns),
        profit_factor: profit_factor(trades),
        max_drawdown_pct: max_drawdown_pct(&returns),
        sharpe_ratio: sharpe_ratio(&returns),
    }
}

// ---------------------------------------------------------------------------
// Per-runner roll-up
// ---------------------------------------------------------------------------

/// FIFO-pair buy and sell timestamps (both ascending) and return the matched
/// holding durations in seconds. A sell that precedes every unmatched buy is
/// skipped rather than paired backwards.
pub fn fifo_pair_durations(buys: &[DateTime<Utc>], sells: &[DateTime<Utc>]) -> Vec<f64> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < buys.len() && j < sells.len() {
        if sells[j] > buys[i] {
            out.push((sells[j] - buys[i]).num_milliseconds() as f64 / 1000.0);
            i += 1;
            j += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Per-runner realized summary. Percent is realized P&L vs total sell
/// proceeds; unrealized is ignored at backtest end.
pub fn runner_summary(trades: &[ClosedTrade]) -> RunnerSummary {
    let realized: f64 = trades.iter().map(|t| t.pnl_amount).sum();
    let proceeds: f64 = trades.iter().map(|t| t.sell_price * t.quantity).sum();
    let pct = if proceeds > 0.0 { realized / proceeds * 100.0 } else { 0.0 };

    let count = trades.len() as u64;
    let avg_pnl = if count > 0 { realized / count as f64 } else { 0.0 };

    let buys: Vec<DateTime<Utc>> = trades.iter().map(|t| t.buy_ts).collect();
    let sells: Vec<DateTime<Utc>> = trades.iter().map(|t| t.sell_ts).collect();
    let durations = fifo_pair_durations(&buys, &sells);
    let avg_duration = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    };

    RunnerSummary {
        final_pnl_amount: round_to(realized, 2),
        final_pnl_percent: round_to(pct, 4),
        trades_count: count,
        avg_pnl_per_trade: round_to(avg_pnl, 4),
        avg_trade_duration_sec: avg_duration,
    }
}

fn round_to(v: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (v * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
