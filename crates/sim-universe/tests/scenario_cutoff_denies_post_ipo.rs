//! Universe cutoff scenario against a live database: a symbol whose earliest
//! daily bar postdates the cutoff is denied with a post-IPO reason, while a
//! symbol with pre-cutoff daily coverage and 5m minutes is admitted.
//!
//! Requires SIM_DATABASE_URL; skips quietly when it is not set.

use chrono::{NaiveDate, TimeZone, Utc};
use sim_config::{parse_alias_map, parse_symbol_set, UniverseConfig};
use sim_md::MarketData;
use sim_universe::UniverseGate;

fn cfg() -> UniverseConfig {
    UniverseConfig {
        cutoff_date: NaiveDate::from_ymd_opt(2020, 9, 18).unwrap(),
        alias_map: parse_alias_map(""),
        exclude_post_ipo: parse_symbol_set(""),
        patch_exclude_minutes: parse_symbol_set(""),
        snapshot_path: None,
    }
}

#[tokio::test]
async fn post_ipo_symbol_is_denied_and_covered_symbol_admitted() {
    if std::env::var(sim_db::ENV_DB_URL).is_err() {
        eprintln!("skipping: {} not set", sim_db::ENV_DB_URL);
        return;
    }
    let pool = sim_db::testkit_db_pool().await.expect("db pool");

    // Seed: UNITIPO listed 2020-12-10 (after cutoff); UNITOLD has daily
    // coverage from 2019 plus 5-minute bars.
    for table_cleanup in [
        "delete from daily_bars where symbol in ('UNITIPO','UNITOLD')",
        "delete from minute_bars where symbol in ('UNITIPO','UNITOLD')",
    ] {
        sqlx::query(table_cleanup).execute(&pool).await.expect("cleanup");
    }

    let ipo_day = Utc.with_ymd_and_hms(2020, 12, 10, 5, 0, 0).unwrap();
    let old_day = Utc.with_ymd_and_hms(2019, 6, 3, 5, 0, 0).unwrap();
    for (symbol, ts) in [("UNITIPO", ipo_day), ("UNITOLD", old_day)] {
        sqlx::query(
            "insert into daily_bars (symbol, ts, open, high, low, close, volume) \
             values ($1, $2, 100, 101, 99, 100.5, 1000) on conflict do nothing",
        )
        .bind(symbol)
        .bind(ts)
        .execute(&pool)
        .await
        .expect("seed daily");
    }
    sqlx::query(
        "insert into minute_bars (symbol, ts, interval_min, open, high, low, close, volume) \
         values ('UNITOLD', $1, 5, 100, 101, 99, 100.5, 500) on conflict do nothing",
    )
    .bind(Utc.with_ymd_and_hms(2019, 6, 3, 14, 30, 0).unwrap())
    .execute(&pool)
    .await
    .expect("seed minute");

    let mkt = MarketData::new("SPY");
    let mut gate = UniverseGate::new(cfg());
    gate.ensure_loaded(
        &["UNITIPO".to_string(), "UNITOLD".to_string()],
        &mkt,
        &pool,
    )
    .await
    .expect("ensure_loaded");

    assert!(!gate.is_allowed("UNITIPO"));
    assert!(
        gate.reason_for("UNITIPO").contains("post-IPO after cutoff"),
        "reason was: {}",
        gate.reason_for("UNITIPO")
    );

    assert!(gate.is_allowed("UNITOLD"));
    assert_eq!(gate.reason_for("UNITOLD"), "allowed");
}
