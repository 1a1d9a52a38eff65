use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::observability::TENANTS_ACTIVE;

/// Manages per-tenant engines. Each tenant gets its own Engine, WAL and
/// compactor. Tenant = database name from the pgwire connection, typically one
/// per property-management company.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// The engine for `tenant`, opening its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(invalid("tenant name too long"));
        }
        // Only the file-safe characters name the WAL, so names that sanitize
        // alike share one engine.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
            .collect();
        if safe_name.is_empty() {
            return Err(invalid("empty tenant name"));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(Arc::clone(engine.value()));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Holding the entry keeps a concurrent first connection from opening
        // the same WAL twice.
        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(e) => return Ok(Arc::clone(e.get())),
            Entry::Vacant(slot) => {
                let engine = Arc::new(Engine::new(
                    self.data_dir.join(format!("{safe_name}.wal")),
                    Arc::new(NotifyHub::new()),
                )?);
                tokio::spawn(compactor::run_compactor(Arc::clone(&engine), self.compact_threshold));
                slot.insert(Arc::clone(&engine));
                engine
            }
        };

        tracing::info!("tenant {safe_name} opened");
        metrics::gauge!(TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}
