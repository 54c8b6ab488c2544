//! Shared runtime state for sim-daemon.

use std::sync::Arc;

use sim_config::SimConfig;
use sqlx::PgPool;
use uuid::Uuid;

/// Static build metadata included in health responses.
#[derive(Clone, Copy, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cfg: Arc<SimConfig>,
    pub build: BuildInfo,
    /// The analytics user every simulation row hangs off.
    pub user_id: i64,
    /// Stable session label for log/status correlation.
    pub instance_id: Uuid,
}

impl AppState {
    pub fn new(pool: PgPool, cfg: Arc<SimConfig>, user_id: i64) -> Self {
        let build = BuildInfo {
            service: "sim-daemon",
            version: env!("CARGO_PKG_VERSION"),
        };
        Self {
            pool,
            cfg,
            instance_id: derive_instance_id(build.service, build.version),
            build,
            user_id,
        }
    }
}

/// Deterministic instance ID from build metadata: `Uuid::new_v5` (SHA-1 over
/// the DNS namespace), stable for a given binary version. No RNG, no clock.
fn derive_instance_id(service: &'static str, version: &'static str) -> Uuid {
    let data = format!("sim-daemon.instance.v1|{service}|{version}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes())
}
