//! Decision explanations.
//!
//! Every strategy attaches a checklist to its decisions so the timeline can
//! show exactly why something fired or was skipped, instead of leaving the
//! user to guess. Checks serialize into the decision map under `"checks"`.

use serde_json::{json, Value};

/// Target side of a check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Wanted {
    /// Compare against a single threshold.
    Value(f64),
    /// Must fall inside [low, high].
    Range(f64, f64),
}

#[derive(Clone, Debug)]
pub struct Check {
    pub label: String,
    pub ok: bool,
    pub actual: f64,
    pub wanted: Wanted,
}

impl Check {
    pub fn value(label: impl Into<String>, ok: bool, actual: f64, wanted: f64) -> Self {
        Self {
            label: label.into(),
            ok,
            actual,
            wanted: Wanted::Value(wanted),
        }
    }

    pub fn range(label: impl Into<String>, ok: bool, actual: f64, low: f64, high: f64) -> Self {
        Self {
            label: label.into(),
            ok,
            actual,
            wanted: Wanted::Range(low, high),
        }
    }

    fn to_json(&self) -> Value {
        match self.wanted {
            Wanted::Value(w) => json!({
                "label": self.label,
                "ok": self.ok,
                "actual": self.actual,
                "wanted": w,
            }),
            Wanted::Range(lo, hi) => json!({
                "label": self.label,
                "ok": self.ok,
                "actual": self.actual,
                "wanted": [lo, hi],
                "direction": "range",
            }),
        }
    }
}

/// RSI-ish labels read better with one decimal; price-like values get two.
fn fmt(label: &str, v: f64) -> String {
    if label.to_lowercase().contains("rsi") {
        format!("{v:.1}")
    } else {
        format!("{v:.2}")
    }
}

fn relation(actual: f64, wanted: f64) -> &'static str {
    if actual < wanted {
        "<"
    } else if actual > wanted {
        ">"
    } else {
        "="
    }
}

/// Vertical checklist: one line per check, pass or fail with the numbers.
pub fn format_checklist(checks: &[Check]) -> String {
    let mut lines = Vec::with_capacity(checks.len());
    for c in checks {
        if c.ok {
            lines.push(format!("✅ {}: {}", c.label, fmt(&c.label, c.actual)));
            continue;
        }
        match c.wanted {
            Wanted::Value(w) => lines.push(format!(
                "❌ {}: {} {} wanted: {}",
                c.label,
                fmt(&c.label, c.actual),
                relation(c.actual, w),
                fmt(&c.label, w),
            )),
            Wanted::Range(lo, hi) => {
                let line = if c.actual < lo {
                    format!(
                        "❌ {}: {} < wanted min: {}",
                        c.label,
                        fmt(&c.label, c.actual),
                        fmt(&c.label, lo)
                    )
                } else if c.actual > hi {
                    format!(
                        "❌ {}: {} > wanted max: {}",
                        c.label,
                        fmt(&c.label, c.actual),
                        fmt(&c.label, hi)
                    )
                } else {
                    format!(
                        "❌ {}: {} outside wanted: [{}..{}]",
                        c.label,
                        fmt(&c.label, c.actual),
                        fmt(&c.label, lo),
                        fmt(&c.label, hi)
                    )
                };
                lines.push(line);
            }
        }
    }
    lines.join("\n")
}

/// Compact single-line form: "actual price: 50.00 < wanted trigger: 60.00".
pub fn format_actual_vs_wanted(
    actual_label: &str,
    actual: f64,
    wanted_label: &str,
    wanted: f64,
) -> String {
    format!(
        "actual {}: {} {} wanted {}: {}",
        actual_label,
        fmt(actual_label, actual),
        relation(actual, wanted),
        wanted_label,
        fmt(wanted_label, wanted),
    )
}

/// JSON array for the decision map's `"checks"` field.
pub fn checks_json(checks: &[Check]) -> Value {
    Value::Array(checks.iter().map(Check::to_json).collect())
}
