use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::calendar::DEFAULT_UTC_OFFSET_MINUTES;
use crate::config::Config;
use crate::engine::Engine;
use crate::limits::*;
use crate::maintenance;
use crate::notify::NotifyHub;

/// Settings every organisation's engine starts from.
#[derive(Debug, Clone, Copy)]
pub struct TenantOptions {
    pub compact_threshold: u64,
    pub default_utc_offset_minutes: i32,
    pub completer_interval: Duration,
}

impl Default for TenantOptions {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            default_utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            completer_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for TenantOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            compact_threshold: cfg.compact_threshold,
            default_utc_offset_minutes: cfg.utc_offset_minutes,
            completer_interval: cfg.completer_interval,
        }
    }
}

/// Manages per-organisation engines. Each organisation gets its own
/// Engine + WAL + completer + compactor.
/// Organisation = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    options: TenantOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, options: TenantOptions) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            options,
        }
    }

    /// Get or lazily create an engine for the given organisation.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // The name becomes the WAL file name verbatim, so two organisations
        // never share a file and nothing escapes the data directory.
        if tenant.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if !tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name may only contain ASCII letters, digits, '_' and '-'",
            ));
        }

        // Two connections may race to create the same organisation; the
        // entry lock makes exactly one of them open the WAL.
        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{tenant}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(
            wal_path,
            notify,
            self.options.default_utc_offset_minutes,
        )?);

        let completer_engine = engine.clone();
        let every = self.options.completer_interval;
        tokio::spawn(async move {
            maintenance::run_completer(completer_engine, every).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.options.compact_threshold;
        tokio::spawn(async move {
            maintenance::run_compactor(compactor_engine, threshold).await;
        });

        entry.or_insert(engine.clone());
        tracing::info!("opened organisation {tenant}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
