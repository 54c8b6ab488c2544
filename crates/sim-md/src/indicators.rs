//! Indicator math over in-memory bar windows.
//!
//! Insufficient data returns `f64::NAN` (or `None` for tuple-shaped
//! indicators); callers treat either as "insufficient data" and emit a
//! NO_ACTION with a reason rather than trading on garbage.

use crate::Bar;

pub fn sma(candles: &[Bar], period: usize) -> f64 {
    if period == 0 || candles.len() < period {
        return f64::NAN;
    }
    let closes = &candles[candles.len() - period..];
    closes.iter().map(|c| c.close).sum::<f64>() / period as f64
}

/// EMA seeded from the close `period` bars back, then folded forward.
pub fn ema(candles: &[Bar], period: usize) -> f64 {
    if period == 0 || candles.len() < period {
        return f64::NAN;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let window = &candles[candles.len() - period..];
    let mut ema = window[0].close;
    for c in &window[1..] {
        ema = c.close * k + ema * (1.0 - k);
    }
    ema
}

/// Simple (non-Wilder) RSI over the trailing `period` deltas.
pub fn rsi(candles: &[Bar], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return f64::NAN;
    }
    let closes: Vec<f64> = candles[candles.len() - (period + 1)..]
        .iter()
        .map(|c| c.close)
        .collect();

    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes.windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Average true range over the trailing `period` bars.
pub fn atr(candles: &[Bar], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return f64::NAN;
    }
    let mut trs = Vec::with_capacity(period);
    let n = candles.len();
    for i in (n - period)..n {
        let h = candles[i].high;
        let l = candles[i].low;
        let pc = candles[i - 1].close;
        trs.push((h - l).max((h - pc).abs()).max((l - pc).abs()));
    }
    trs.iter().sum::<f64>() / trs.len() as f64
}

/// Donchian channel (highest high, lowest low) over `lookback` bars.
pub fn donchian_channel(candles: &[Bar], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || candles.len() < lookback {
        return None;
    }
    let window = &candles[candles.len() - lookback..];
    let upper = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lower = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    Some((upper, lower))
}

/// Bollinger bands `(upper, mid, lower)` = SMA(period) ± num_std · stdev.
/// Population stdev, matching the usual charting definition.
pub fn bollinger_bands(candles: &[Bar], period: usize, num_std: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let closes: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| c.close)
        .collect();
    let mid = closes.iter().sum::<f64>() / period as f64;
    let var = closes.iter().map(|c| (c - mid).powi(2)).sum::<f64>() / period as f64;
    let sd = var.sqrt();
    Some((mid + num_std * sd, mid, mid - num_std * sd))
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = match values.first() {
        Some(v) => *v,
        None => return out,
    };
    out.push(ema);
    for v in &values[1..] {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

/// MACD(fast, slow, signal) -> `(macd_line, signal_line)` at the last bar.
pub fn macd(candles: &[Bar], fast: usize, slow: usize, signal: usize) -> Option<(f64, f64)> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return None;
    }
    if candles.len() < slow + signal {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ema_fast = ema_series(&closes, fast);
    let ema_slow = ema_series(&closes, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd_line, signal);
    Some((*macd_line.last()?, *signal_line.last()?))
}

/// Stochastic oscillator: %K over `k_period` highs/lows, %D = SMA(d_period)
/// of the trailing %K values.
pub fn stochastic(candles: &[Bar], k_period: usize, d_period: usize) -> Option<(f64, f64)> {
    if k_period == 0 || d_period == 0 || candles.len() < k_period + d_period - 1 {
        return None;
    }

    let percent_k_at = |end: usize| -> Option<f64> {
        if end < k_period {
            return None;
        }
        let window = &candles[end - k_period..end];
        let hi = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lo = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let close = candles[end - 1].close;
        if hi > lo {
            Some((close - lo) / (hi - lo) * 100.0)
        } else {
            Some(50.0)
        }
    };

    let n = candles.len();
    let k = percent_k_at(n)?;
    let mut ks = Vec::with_capacity(d_period);
    for back in 0..d_period {
        ks.push(percent_k_at(n - back)?);
    }
    let d = ks.iter().sum::<f64>() / d_period as f64;
    Some((k, d))
}

pub fn average_volume(candles: &[Bar], period: usize) -> f64 {
    if period == 0 || candles.len() < period {
        return 0.0;
    }
    let window = &candles[candles.len() - period..];
    window.iter().map(|c| c.volume as f64).sum::<f64>() / period as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Bar::new(
                    t0 + Duration::minutes(5 * i as i64),
                    *c,
                    c + 1.0,
                    c - 1.0,
                    *c,
                    1_000 + i as i64,
                )
            })
            .collect()
    }

    #[test]
    fn sma_is_arithmetic_mean_of_tail() {
        let b = bars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((sma(&b, 3) - 4.0).abs() < 1e-12);
        assert!(sma(&b, 6).is_nan());
    }

    #[test]
    fn ema_seeds_from_window_start() {
        let b = bars(&[10.0, 11.0, 12.0]);
        // k = 0.5; seed 10 -> 10.5 -> 11.25
        assert!((ema(&b, 3) - 11.25).abs() < 1e-12);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let b = bars(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!((rsi(&b, 5) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn rsi_balanced_moves_is_50() {
        let b = bars(&[10.0, 11.0, 10.0, 11.0, 10.0]);
        let v = rsi(&b, 4);
        assert!((v - 50.0).abs() < 1e-9, "got {v}");
    }

    #[test]
    fn rsi_requires_period_plus_one_bars() {
        let b = bars(&[1.0, 2.0, 3.0]);
        assert!(rsi(&b, 3).is_nan());
    }

    #[test]
    fn atr_with_flat_closes_equals_range() {
        // high-low is always 2.0 and dominates both close-relative terms.
        let b = bars(&[5.0, 5.0, 5.0, 5.0]);
        assert!((atr(&b, 3) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn donchian_returns_extremes() {
        let b = bars(&[3.0, 9.0, 6.0]);
        let (hi, lo) = donchian_channel(&b, 3).unwrap();
        assert_eq!(hi, 10.0);
        assert_eq!(lo, 2.0);
        assert!(donchian_channel(&b, 4).is_none());
    }

    #[test]
    fn bollinger_mid_is_sma_and_bands_are_symmetric() {
        let b = bars(&[2.0, 4.0, 6.0]);
        let (u, m, l) = bollinger_bands(&b, 3, 2.0).unwrap();
        assert!((m - 4.0).abs() < 1e-12);
        assert!((u + l - 2.0 * m).abs() < 1e-12);
        assert!(u > m && l < m);
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let b = bars(&[7.0; 40]);
        let (line, signal) = macd(&b, 12, 26, 9).unwrap();
        assert!(line.abs() < 1e-12);
        assert!(signal.abs() < 1e-12);
    }

    #[test]
    fn macd_uptrend_is_positive() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let b = bars(&closes);
        let (line, _signal) = macd(&b, 12, 26, 9).unwrap();
        assert!(line > 0.0);
    }

    #[test]
    fn stochastic_at_top_of_range_is_high() {
        // Rising closes with fixed ±1 wicks: close sits near the top.
        let closes: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        let b = bars(&closes);
        let (k, d) = stochastic(&b, 14, 3).unwrap();
        assert!(k > 80.0, "k={k}");
        assert!(d > 80.0, "d={d}");
    }

    #[test]
    fn average_volume_over_tail() {
        let b = bars(&[1.0, 1.0, 1.0, 1.0]);
        // volumes 1000..1003; last 2 -> 1002.5
        assert!((average_volume(&b, 2) - 1002.5).abs() < 1e-12);
        assert_eq!(average_volume(&b, 10), 0.0);
    }
}
