//! Reference aggregate scenario: trade returns [+10%, -5%, +7%] compound to
//! 11.815%, and the Sharpe / drawdown computed from the same series match
//! their definitions to 1e-9.

use chrono::{Duration, TimeZone, Utc};
use sim_metrics::{compute_kpis, ClosedTrade};

fn trades() -> Vec<ClosedTrade> {
    let t0 = Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap();
    [(200.0, 10.0), (-110.0, -5.0), (150.0, 7.0)]
        .iter()
        .enumerate()
        .map(|(i, (amount, pct))| ClosedTrade {
            buy_ts: t0 + Duration::minutes(10 * i as i64),
            sell_ts: t0 + Duration::minutes(10 * i as i64 + 5),
            sell_price: 100.0,
            quantity: 10.0,
            pnl_amount: *amount,
            pnl_percent: *pct,
        })
        .collect()
}

#[test]
fn reference_series_kpis() {
    let kpis = compute_kpis(&trades());

    // (1.10)(0.95)(1.07) - 1 = 0.11815
    assert!((kpis.compounded_pnl_pct - 11.815).abs() < 1e-9);

    // Equity curve [1.10, 1.045, 1.11815]: trough vs 1.10 peak = 5%.
    assert!((kpis.max_drawdown_pct - 5.0).abs() < 1e-9);

    // mean=0.04, stdev(ddof=1)=sqrt(0.0063): 0.04*sqrt(252/0.0063) = 8.
    assert!((kpis.sharpe_ratio - 8.0).abs() < 1e-9);

    // wins 350 vs losses 110.
    assert!((kpis.profit_factor - 350.0 / 110.0).abs() < 1e-12);
}
