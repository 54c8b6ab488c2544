//! Pace override file, read at tick boundaries.
//!
//! JSON shape: `{"enabled": bool, "pace_seconds": f64?}`. A missing or
//! unreadable file means no override; a present-but-disabled file pins the
//! loop back to the configured pace.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
pub struct PaceFile {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub pace_seconds: Option<f64>,
}

/// Effective pace for the next tick: the file override when enabled, else the
/// configured default.
pub async fn effective_pace_seconds(path: Option<&Path>, configured: f64) -> f64 {
    let Some(path) = path else {
        return configured;
    };
    let Ok(text) = tokio::fs::read_to_string(path).await else {
        return configured;
    };
    match serde_json::from_str::<PaceFile>(&text) {
        Ok(pace) if pace.enabled => pace.pace_seconds.unwrap_or(configured).max(0.0),
        Ok(_) => configured,
        Err(e) => {
            debug!(error = %e, path = %path.display(), "unparseable pace file ignored");
            configured
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pace_file_parses_both_fields() {
        let p: PaceFile = serde_json::from_str(r#"{"enabled": true, "pace_seconds": 0.5}"#).unwrap();
        assert!(p.enabled);
        assert_eq!(p.pace_seconds, Some(0.5));
    }

    #[test]
    fn pace_file_defaults_when_fields_missing() {
        let p: PaceFile = serde_json::from_str("{}").unwrap();
        assert!(!p.enabled);
        assert_eq!(p.pace_seconds, None);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_configured() {
        let pace =
            effective_pace_seconds(Some(Path::new("/nonexistent/pace.json")), 1.5).await;
        assert_eq!(pace, 1.5);
    }

    #[tokio::test]
    async fn no_path_falls_back_to_configured() {
        assert_eq!(effective_pace_seconds(None, 0.25).await, 0.25);
    }
}
