//! Health-gate TTL scenario: a coverage-excluded pair is re-admitted exactly
//! once its TTL lapses, with consecutive counters reset; and the exclusion
//! threshold is exact (one incident short stays admitted).

use chrono::{Duration, TimeZone, Utc};
use sim_config::HealthConfig;
use sim_health::{HealthGate, PairHealth};

#[test]
fn coverage_exclusion_readmits_after_ttl() {
    let mut gate = HealthGate::new(HealthConfig {
        ttl_days: 1,
        ..HealthConfig::default()
    });
    let t0 = Utc.with_ymd_and_hms(2021, 3, 1, 15, 0, 0).unwrap();

    gate.exclude_coverage("CMCSA", 5, None, t0);
    let (excluded, reason) = gate.is_excluded("CMCSA", 5, t0);
    assert!(excluded);
    assert_eq!(reason.as_deref(), Some("coverage"));

    // One day later: TTL lapsed, pair is healthy again and counters reset.
    let t1 = t0 + Duration::days(1);
    let (excluded, reason) = gate.is_excluded("CMCSA", 5, t1);
    assert!(!excluded);
    assert_eq!(reason, None);
    assert_eq!(gate.state_of("CMCSA", 5), PairHealth::Healthy);

    // Fresh incidents start counting from zero after re-admission.
    let day = t1.date_naive();
    gate.note_no_data("CMCSA", 5, t1, day);
    gate.note_no_data("CMCSA", 5, t1, day);
    assert_eq!(gate.state_of("CMCSA", 5), PairHealth::Healthy);
}

#[test]
fn exclusion_threshold_is_exact() {
    let mut gate = HealthGate::new(HealthConfig::default());
    let t0 = Utc.with_ymd_and_hms(2021, 3, 1, 15, 0, 0).unwrap();

    // Nine incidents across the window: still admitted (possibly degraded).
    for i in 0..9u32 {
        let at = t0 + Duration::days(i64::from(i % 5));
        gate.note_error("PLTR", 5, at, at.date_naive());
    }
    assert!(!gate.is_excluded("PLTR", 5, t0 + Duration::days(4)).0);

    // The tenth tips it over.
    let at = t0 + Duration::days(4);
    gate.note_error("PLTR", 5, at, at.date_naive());
    assert!(gate.is_excluded("PLTR", 5, at).0);
}
