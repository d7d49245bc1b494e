use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::engine::{Engine, EngineConfig};
use crate::limits::*;
use crate::sweeper;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + sweeper.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    engine_config: EngineConfig,
    compact_threshold: u64,
    sweep_interval: Duration,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        engine_config: EngineConfig,
        compact_threshold: u64,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            engine_config,
            compact_threshold,
            sweep_interval,
        }
    }

    /// Get or lazily open the engine for the given tenant. Names that sanitize
    /// to the same file name share one engine.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize(tenant);
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections racing on a new tenant must not open the same WAL twice.
        let engine = match self.engines.entry(safe_name) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{}.wal", slot.key()));
                let engine = Arc::new(Engine::open(&wal_path, self.engine_config.clone())?);
                slot.insert(engine.clone());
                engine
            }
        };

        sweeper::spawn(engine.clone(), self.sweep_interval, self.compact_threshold);
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!("opened tenant {tenant}");
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

/// Keep only characters that are safe in a file name.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
