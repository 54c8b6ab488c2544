//! Small typed env-var readers. All of them fall back to a default instead of
//! erroring on absence; parse failures are real errors so a typo in a
//! deployment manifest is caught at boot rather than silently defaulted.

use anyhow::{Context, Result};

pub fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

pub fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn env_i64(key: &str, default: i64) -> Result<i64> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{key} must be an integer, got '{v}'")),
        _ => Ok(default),
    }
}

pub fn env_opt_i64(key: &str) -> Result<Option<i64>> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<i64>()
            .map(Some)
            .with_context(|| format!("{key} must be an integer, got '{v}'")),
        _ => Ok(None),
    }
}

pub fn env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u32>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{v}'")),
        _ => Ok(default),
    }
}

pub fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<usize>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{v}'")),
        _ => Ok(default),
    }
}

pub fn env_f64(key: &str, default: f64) -> Result<f64> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{key} must be a number, got '{v}'")),
        _ => Ok(default),
    }
}

/// Accepts 1/0/true/false/yes/no (case-insensitive); anything else falls back
/// to the default.
pub fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => parse_bool(&v).unwrap_or(default),
        Err(_) => default,
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("FALSE"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn numeric_defaults_apply_when_unset() {
        assert_eq!(env_i64("SIM_TEST_UNSET_I64", 42).unwrap(), 42);
        assert_eq!(env_f64("SIM_TEST_UNSET_F64", 2.5).unwrap(), 2.5);
        assert_eq!(env_u32("SIM_TEST_UNSET_U32", 7).unwrap(), 7);
    }
}
