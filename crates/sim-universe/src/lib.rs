//! Universe hygiene for historical sims.
//!
//! Rules, in deny order:
//!   1. Symbols on the post-IPO exclusion list are denied outright.
//!   2. Symbols with known minute-data gaps are denied.
//!   3. When a snapshot allowlist file exists, absent symbols are denied.
//!   4. Earliest daily bar (after alias mapping) must exist and be on/before
//!      the cutoff date.
//!   5. Some 5-minute coverage is required.
//!
//! Admitted symbols trade under their runner identity but read data through
//! the alias map (e.g. META -> FB). The gate evaluates once per run and its
//! reasons stay queryable.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use sim_config::UniverseConfig;
use sim_md::MarketData;

/// Interval used for the minimum minute-coverage check.
const COVERAGE_INTERVAL_MIN: u32 = 5;

pub struct UniverseGate {
    cfg: UniverseConfig,
    loaded_syms: BTreeSet<String>,
    allowed: BTreeSet<String>,
    reasons: BTreeMap<String, String>,
    mapped: BTreeMap<String, String>,
}

impl UniverseGate {
    pub fn new(cfg: UniverseConfig) -> Self {
        Self {
            cfg,
            loaded_syms: BTreeSet::new(),
            allowed: BTreeSet::new(),
            reasons: BTreeMap::new(),
            mapped: BTreeMap::new(),
        }
    }

    /// Partition the run's symbols into allowed/denied. Idempotent per run:
    /// re-invoking with the same set is a no-op.
    pub async fn ensure_loaded(
        &mut self,
        symbols: &[String],
        mkt: &MarketData,
        pool: &PgPool,
    ) -> Result<()> {
        let syms: BTreeSet<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if syms == self.loaded_syms && !self.loaded_syms.is_empty() {
            return Ok(());
        }

        self.loaded_syms = syms.clone();
        self.allowed.clear();
        self.reasons.clear();
        self.mapped.clear();

        // Snapshot allowlist overrides everything when present.
        let snapshot_allowed: Option<BTreeSet<String>> = match &self.cfg.snapshot_path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read universe snapshot {}", path.display()))?;
                Some(
                    text.lines()
                        .map(|l| l.trim().to_uppercase())
                        .filter(|l| !l.is_empty())
                        .collect(),
                )
            }
            _ => None,
        };

        for s in &syms {
            if self.cfg.exclude_post_ipo.contains(s) {
                self.reasons
                    .insert(s.clone(), "post-IPO excluded by policy".to_string());
                continue;
            }
            if self.cfg.patch_exclude_minutes.contains(s) {
                self.reasons.insert(
                    s.clone(),
                    "excluded due to known minute-data gaps".to_string(),
                );
                continue;
            }
            if let Some(allowlist) = &snapshot_allowed {
                if !allowlist.contains(s) {
                    self.reasons
                        .insert(s.clone(), "excluded by snapshot".to_string());
                    continue;
                }
            }

            // Alias mapping first (e.g. META -> FB), then the coverage gates.
            let mapped = self.cfg.alias_map.get(s).cloned().unwrap_or_else(|| s.clone());
            self.mapped.insert(s.clone(), mapped.clone());

            let first_daily: Option<DateTime<Utc>> =
                match mkt.earliest_daily(pool, &mapped).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(symbol = %s, error = %e, "earliest-daily lookup failed");
                        None
                    }
                };
            let Some(first_daily) = first_daily else {
                self.reasons
                    .insert(s.clone(), "no daily coverage (likely post-IPO)".to_string());
                continue;
            };
            if first_daily.date_naive() > self.cfg.cutoff_date {
                self.reasons.insert(
                    s.clone(),
                    format!("post-IPO after cutoff {}", self.cfg.cutoff_date),
                );
                continue;
            }

            // Require some 5-minute coverage to avoid per-tick no-data spam.
            // A failed check does not block; the runner tick will catch it.
            match mkt.has_minute(pool, &mapped, COVERAGE_INTERVAL_MIN).await {
                Ok(false) => {
                    self.reasons
                        .insert(s.clone(), "no minute coverage (5m)".to_string());
                    continue;
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(symbol = %s, error = %e, "minute-coverage lookup failed");
                }
            }

            self.allowed.insert(s.clone());
            self.reasons.insert(s.clone(), "allowed".to_string());
        }

        info!(
            allowed = self.allowed.len(),
            total = syms.len(),
            cutoff = %self.cfg.cutoff_date,
            snapshot = self
                .cfg
                .snapshot_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            "universe loaded"
        );
        Ok(())
    }

    pub fn is_allowed(&self, symbol: &str) -> bool {
        self.allowed.contains(&symbol.to_uppercase())
    }

    pub fn reason_for(&self, symbol: &str) -> &str {
        self.reasons
            .get(&symbol.to_uppercase())
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Mapped/historical data symbol; identity for unmapped symbols.
    pub fn map_symbol(&self, symbol: &str) -> String {
        let s = symbol.to_uppercase();
        self.mapped
            .get(&s)
            .or_else(|| self.cfg.alias_map.get(&s))
            .cloned()
            .unwrap_or(s)
    }

    /// Mapped symbols of the currently allowed set.
    pub fn allowed_symbols(&self) -> BTreeSet<String> {
        self.allowed.iter().map(|s| self.map_symbol(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sim_config::{parse_alias_map, parse_symbol_set};

    fn cfg() -> UniverseConfig {
        UniverseConfig {
            cutoff_date: NaiveDate::from_ymd_opt(2020, 9, 18).unwrap(),
            alias_map: parse_alias_map("META:FB"),
            exclude_post_ipo: parse_symbol_set("ABNB"),
            patch_exclude_minutes: parse_symbol_set(""),
            snapshot_path: None,
        }
    }

    #[test]
    fn map_symbol_uses_alias_map_before_load() {
        let gate = UniverseGate::new(cfg());
        assert_eq!(gate.map_symbol("meta"), "FB");
        assert_eq!(gate.map_symbol("AAPL"), "AAPL");
    }

    #[test]
    fn unknown_symbol_reason_is_unknown() {
        let gate = UniverseGate::new(cfg());
        assert_eq!(gate.reason_for("ZZZZ"), "unknown");
        assert!(!gate.is_allowed("ZZZZ"));
    }
}
