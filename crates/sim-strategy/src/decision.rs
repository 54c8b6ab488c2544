//! Validating parser from the generic decision map to a tagged variant.
//!
//! Rules:
//! - `NO_ACTION` (or a missing/empty action) passes through, preserving the
//!   full map for detail payloads.
//! - `quantity`, when present, must be a positive integer.
//! - `order_type=LMT` requires a positive `limit_price`.
//! - A BUY outside the analytics environment must carry a valid
//!   `trail_stop_order` or `static_stop_order`; analytics relaxes this and
//!   the engine later injects a static stop from runner parameters.

use serde_json::Value;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderType {
    Mkt,
    Lmt,
    Stop,
    StopLimit,
    TrailLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Mkt => "MKT",
            OrderType::Lmt => "LMT",
            OrderType::Stop => "STOP",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::TrailLimit => "TRAIL_LIMIT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "MKT" | "" => Some(OrderType::Mkt),
            "LMT" => Some(OrderType::Lmt),
            "STOP" => Some(OrderType::Stop),
            "STOP_LIMIT" => Some(OrderType::StopLimit),
            "TRAIL_LIMIT" => Some(OrderType::TrailLimit),
            _ => None,
        }
    }
}

/// Trailing-stop request attached to a BUY.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrailStopSpec {
    pub trailing_percent: Option<f64>,
    pub trailing_amount: Option<f64>,
}

/// Static-stop request attached to a BUY.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticStopSpec {
    pub order_type: OrderType,
    pub stop_price: f64,
    pub limit_price: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct BuyDecision {
    pub quantity: Option<i64>,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub trail_stop: Option<TrailStopSpec>,
    pub static_stop: Option<StaticStopSpec>,
    pub reason: Option<String>,
    pub explanation: Option<String>,
    /// Original map minus nothing; kept for execution-detail payloads.
    pub raw: Value,
}

#[derive(Clone, Debug)]
pub struct SellDecision {
    pub quantity: Option<i64>,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub reason: Option<String>,
    pub explanation: Option<String>,
    pub raw: Value,
}

#[derive(Clone, Debug)]
pub struct NoActionDecision {
    pub reason: String,
    pub raw: Value,
}

#[derive(Clone, Debug)]
pub enum Decision {
    Buy(BuyDecision),
    Sell(SellDecision),
    NoAction(NoActionDecision),
}

impl Decision {
    pub fn action(&self) -> &'static str {
        match self {
            Decision::Buy(_) => "BUY",
            Decision::Sell(_) => "SELL",
            Decision::NoAction(_) => "NO_ACTION",
        }
    }

    pub fn raw(&self) -> &Value {
        match self {
            Decision::Buy(d) => &d.raw,
            Decision::Sell(d) => &d.raw,
            Decision::NoAction(d) => &d.raw,
        }
    }
}

/// Whether BUY stop requirements are enforced (live) or relaxed (analytics).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationEnv {
    Analytics,
    Live,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionError {
    InvalidAction { action: String },
    InvalidQuantity,
    LimitPriceRequired,
    MissingStopSpec,
    InvalidTrailStop,
    InvalidStaticStop { detail: &'static str },
}

impl std::fmt::Display for DecisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionError::InvalidAction { action } => write!(f, "invalid action '{action}'"),
            DecisionError::InvalidQuantity => {
                write!(f, "quantity must be an integer > 0 when provided")
            }
            DecisionError::LimitPriceRequired => {
                write!(f, "LMT orders require a positive limit_price")
            }
            DecisionError::MissingStopSpec => write!(
                f,
                "BUY decision must include either 'trail_stop_order' or 'static_stop_order'"
            ),
            DecisionError::InvalidTrailStop => write!(
                f,
                "trail_stop_order must include positive trailing_percent or trailing_amount"
            ),
            DecisionError::InvalidStaticStop { detail } => {
                write!(f, "invalid static_stop_order: {detail}")
            }
        }
    }
}

impl std::error::Error for DecisionError {}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn get_f64(v: &Value, key: &str) -> Option<f64> {
    match v.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn get_str(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn parse_quantity(v: &Value) -> Result<Option<i64>, DecisionError> {
    match v.get("quantity") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            // Fractional quantities are rejected, whole floats tolerated.
            if let Some(q) = n.as_i64() {
                if q > 0 {
                    return Ok(Some(q));
                }
            } else if let Some(f) = n.as_f64() {
                if f > 0.0 && f.fract() == 0.0 {
                    return Ok(Some(f as i64));
                }
            }
            Err(DecisionError::InvalidQuantity)
        }
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(q) if q > 0 => Ok(Some(q)),
            _ => Err(DecisionError::InvalidQuantity),
        },
        Some(_) => Err(DecisionError::InvalidQuantity),
    }
}

fn parse_trail_spec(v: &Value) -> Result<Option<TrailStopSpec>, DecisionError> {
    let Some(spec) = v.get("trail_stop_order") else {
        return Ok(None);
    };
    if !spec.is_object() {
        return Ok(None);
    }
    let pct = get_f64(spec, "trailing_percent");
    let amt = get_f64(spec, "trailing_amount");
    let pct_ok = pct.is_some_and(|p| p > 0.0);
    let amt_ok = amt.is_some_and(|a| a > 0.0);
    if !pct_ok && !amt_ok {
        return Err(DecisionError::InvalidTrailStop);
    }
    Ok(Some(TrailStopSpec {
        trailing_percent: pct,
        trailing_amount: amt,
    }))
}

fn parse_static_spec(v: &Value) -> Result<Option<StaticStopSpec>, DecisionError> {
    let Some(spec) = v.get("static_stop_order") else {
        return Ok(None);
    };
    if !spec.is_object() {
        return Ok(None);
    }
    let stop_price = get_f64(spec, "stop_price").filter(|p| *p > 0.0).ok_or(
        DecisionError::InvalidStaticStop {
            detail: "stop_price must be positive",
        },
    )?;
    // A missing order_type is rejected, not defaulted: the spec map must
    // say STOP or STOP_LIMIT explicitly.
    let order_type = match get_str(spec, "order_type") {
        Some(s) if s.eq_ignore_ascii_case("STOP") => OrderType::Stop,
        Some(s) if s.eq_ignore_ascii_case("STOP_LIMIT") => OrderType::StopLimit,
        _ => {
            return Err(DecisionError::InvalidStaticStop {
                detail: "order_type must be STOP or STOP_LIMIT",
            })
        }
    };
    let limit_price = get_f64(spec, "limit_price");
    if order_type == OrderType::StopLimit && !limit_price.is_some_and(|p| p > 0.0) {
        return Err(DecisionError::InvalidStaticStop {
            detail: "STOP_LIMIT requires a positive limit_price",
        });
    }
    Ok(Some(StaticStopSpec {
        order_type,
        stop_price,
        limit_price,
    }))
}

/// Parse + validate a raw strategy decision. `is_exit` is informational (a
/// SELL is only dispatched when a position is open); `env` controls whether
/// BUY stop requirements are enforced.
pub fn parse_decision(
    raw: &Value,
    is_exit: bool,
    env: ValidationEnv,
) -> Result<Decision, DecisionError> {
    let _ = is_exit;

    let action_raw = get_str(raw, "action").unwrap_or_default();
    let action = action_raw.to_uppercase();

    if action.is_empty() || action == "NO_ACTION" {
        return Ok(Decision::NoAction(NoActionDecision {
            reason: get_str(raw, "reason").unwrap_or_else(|| "no_signal".to_string()),
            raw: raw.clone(),
        }));
    }

    if action != "BUY" && action != "SELL" {
        return Err(DecisionError::InvalidAction { action: action_raw });
    }

    let quantity = parse_quantity(raw)?;

    let order_type = get_str(raw, "order_type")
        .and_then(|s| OrderType::parse(&s))
        .unwrap_or(OrderType::Mkt);
    let limit_price = get_f64(raw, "limit_price");
    if order_type == OrderType::Lmt && !limit_price.is_some_and(|p| p > 0.0) {
        return Err(DecisionError::LimitPriceRequired);
    }

    let reason = get_str(raw, "reason");
    let explanation = get_str(raw, "explanation");

    if action == "SELL" {
        return Ok(Decision::Sell(SellDecision {
            quantity,
            order_type,
            limit_price,
            stop_price: get_f64(raw, "stop_price"),
            reason,
            explanation,
            raw: raw.clone(),
        }));
    }

    let trail_stop = parse_trail_spec(raw)?;
    let static_stop = parse_static_spec(raw)?;

    if env == ValidationEnv::Live && trail_stop.is_none() && static_stop.is_none() {
        return Err(DecisionError::MissingStopSpec);
    }

    Ok(Decision::Buy(BuyDecision {
        quantity,
        order_type,
        limit_price,
        trail_stop,
        static_stop,
        reason,
        explanation,
        raw: raw.clone(),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_map_is_no_action_with_default_reason() {
        let d = parse_decision(&json!({}), false, ValidationEnv::Analytics).unwrap();
        match d {
            Decision::NoAction(n) => assert_eq!(n.reason, "no_signal"),
            other => panic!("expected NoAction, got {other:?}"),
        }
    }

    #[test]
    fn no_action_preserves_full_map() {
        let raw = json!({"action": "NO_ACTION", "reason": "coin_flip", "price": 12.5});
        let d = parse_decision(&raw, false, ValidationEnv::Analytics).unwrap();
        assert_eq!(d.raw(), &raw);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = parse_decision(&json!({"action": "SHORT"}), false, ValidationEnv::Analytics)
            .unwrap_err();
        assert!(matches!(err, DecisionError::InvalidAction { .. }));
    }

    #[test]
    fn quantity_must_be_positive_integer_when_present() {
        let base = json!({"action": "SELL"});
        assert!(parse_decision(&base, true, ValidationEnv::Analytics).is_ok());

        for bad in [json!(0), json!(-3), json!(1.5), json!("x")] {
            let mut m = base.clone();
            m["quantity"] = bad;
            let err = parse_decision(&m, true, ValidationEnv::Analytics).unwrap_err();
            assert_eq!(err, DecisionError::InvalidQuantity);
        }

        let mut m = base.clone();
        m["quantity"] = json!(10);
        match parse_decision(&m, true, ValidationEnv::Analytics).unwrap() {
            Decision::Sell(s) => assert_eq!(s.quantity, Some(10)),
            other => panic!("expected Sell, got {other:?}"),
        }
    }

    #[test]
    fn lmt_requires_positive_limit_price() {
        let err = parse_decision(
            &json!({"action": "BUY", "order_type": "LMT"}),
            false,
            ValidationEnv::Analytics,
        )
        .unwrap_err();
        assert_eq!(err, DecisionError::LimitPriceRequired);

        let ok = parse_decision(
            &json!({"action": "BUY", "order_type": "LMT", "limit_price": 101.5}),
            false,
            ValidationEnv::Analytics,
        )
        .unwrap();
        match ok {
            Decision::Buy(b) => {
                assert_eq!(b.order_type, OrderType::Lmt);
                assert_eq!(b.limit_price, Some(101.5));
            }
            other => panic!("expected Buy, got {other:?}"),
        }
    }

    #[test]
    fn live_buy_requires_a_stop_spec_but_analytics_does_not() {
        let bare = json!({"action": "BUY"});
        assert!(parse_decision(&bare, false, ValidationEnv::Analytics).is_ok());
        assert_eq!(
            parse_decision(&bare, false, ValidationEnv::Live).unwrap_err(),
            DecisionError::MissingStopSpec
        );

        let with_trail = json!({
            "action": "BUY",
            "trail_stop_order": {"trailing_percent": 2.5}
        });
        assert!(parse_decision(&with_trail, false, ValidationEnv::Live).is_ok());
    }

    #[test]
    fn trail_spec_needs_a_positive_component() {
        let bad = json!({
            "action": "BUY",
            "trail_stop_order": {"trailing_percent": 0.0}
        });
        assert_eq!(
            parse_decision(&bad, false, ValidationEnv::Analytics).unwrap_err(),
            DecisionError::InvalidTrailStop
        );

        let via_amount = json!({
            "action": "BUY",
            "trail_stop_order": {"trailing_amount": 1.25}
        });
        match parse_decision(&via_amount, false, ValidationEnv::Analytics).unwrap() {
            Decision::Buy(b) => {
                let spec = b.trail_stop.unwrap();
                assert_eq!(spec.trailing_amount, Some(1.25));
            }
            other => panic!("expected Buy, got {other:?}"),
        }
    }

    #[test]
    fn static_stop_validation() {
        let no_price = json!({
            "action": "BUY",
            "static_stop_order": {"order_type": "STOP"}
        });
        assert!(matches!(
            parse_decision(&no_price, false, ValidationEnv::Analytics).unwrap_err(),
            DecisionError::InvalidStaticStop { .. }
        ));

        // order_type is mandatory on a static stop spec.
        let no_order_type = json!({
            "action": "BUY",
            "static_stop_order": {"stop_price": 99.0}
        });
        assert!(matches!(
            parse_decision(&no_order_type, false, ValidationEnv::Analytics).unwrap_err(),
            DecisionError::InvalidStaticStop { .. }
        ));

        let stop_limit_no_limit = json!({
            "action": "BUY",
            "static_stop_order": {"order_type": "STOP_LIMIT", "stop_price": 99.0}
        });
        assert!(matches!(
            parse_decision(&stop_limit_no_limit, false, ValidationEnv::Analytics).unwrap_err(),
            DecisionError::InvalidStaticStop { .. }
        ));

        let ok = json!({
            "action": "BUY",
            "static_stop_order": {"order_type": "STOP", "stop_price": 99.0}
        });
        match parse_decision(&ok, false, ValidationEnv::Analytics).unwrap() {
            Decision::Buy(b) => {
                let spec = b.static_stop.unwrap();
                assert_eq!(spec.stop_price, 99.0);
                assert_eq!(spec.order_type, OrderType::Stop);
            }
            other => panic!("expected Buy, got {other:?}"),
        }
    }

    #[test]
    fn lowercase_action_is_normalized() {
        let d = parse_decision(&json!({"action": "buy"}), false, ValidationEnv::Analytics).unwrap();
        assert_eq!(d.action(), "BUY");
    }
}
