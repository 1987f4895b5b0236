//! Live servers keyed by id, mirrored to the `servers` store key.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::{ServerConfig, ServerSettings, ToolServer};
use crate::error::{Result, StoreError};
use crate::model::ModelConfig;
use crate::store::KvStore;

const SERVERS_KEY: &str = "servers";

pub struct ServerManager {
    store: Arc<dyn KvStore>,
    settings: ServerSettings,
    servers: RwLock<BTreeMap<String, Arc<ToolServer>>>,
    /// Serializes store read-modify-write cycles with the live map.
    writes: Mutex<()>,
}

impl ServerManager {
    /// Rebuild every persisted server. Entries that fail to build are
    /// logged and left in the store untouched.
    pub fn new(store: Arc<dyn KvStore>, settings: ServerSettings) -> Result<Self> {
        let manager = Self {
            store,
            settings,
            servers: RwLock::new(BTreeMap::new()),
            writes: Mutex::new(()),
        };
        let configs = manager.server_configs()?;
        let mut live = BTreeMap::new();
        for (id, config) in configs {
            match ToolServer::build(config, &manager.settings) {
                Ok(server) => {
                    live.insert(id, Arc::new(server));
                }
                Err(e) => tracing::warn!(server_id = %id, "skipping persisted server: {}", e),
            }
        }
        tracing::info!(count = live.len(), "servers loaded");
        *manager.servers.write().unwrap_or_else(|e| e.into_inner()) = live;
        Ok(manager)
    }

    /// Persisted configurations, including ones that failed to build.
    pub fn server_configs(&self) -> Result<BTreeMap<String, ServerConfig>> {
        let Some(raw) = self.store.get(SERVERS_KEY)? else {
            return Ok(BTreeMap::new());
        };
        let Some(entries) = raw.as_object() else {
            tracing::warn!("ignoring malformed '{}' entry in store", SERVERS_KEY);
            return Ok(BTreeMap::new());
        };
        let mut out = BTreeMap::new();
        for (id, v) in entries {
            match serde_json::from_value::<ServerConfig>(v.clone()) {
                Ok(cfg) => {
                    out.insert(id.clone(), cfg);
                }
                Err(e) => tracing::warn!(server_id = %id, "skipping unreadable server config: {}", e),
            }
        }
        Ok(out)
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, configs: &BTreeMap<String, ServerConfig>) -> Result<()> {
        let value = serde_json::to_value(configs).map_err(StoreError::from)?;
        self.store.set(SERVERS_KEY, value)?;
        Ok(())
    }

    /// Build and register a server, replacing any under the same id.
    pub fn create_server(&self, config: ServerConfig) -> Result<Arc<ToolServer>> {
        let _guard = self.write_guard();
        self.create_locked(config)
    }

    fn create_locked(&self, config: ServerConfig) -> Result<Arc<ToolServer>> {
        let server = Arc::new(ToolServer::build(config.clone(), &self.settings)?);
        let mut configs = self.server_configs()?;
        configs.insert(config.id.clone(), config.clone());
        self.persist(&configs)?;

        let replaced = self
            .servers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(config.id.clone(), server.clone())
            .is_some();
        tracing::info!(server_id = %config.id, replaced, "server created");
        Ok(server)
    }

    /// Discard the server under `id` and build a fresh one from `config`.
    /// Pending steps of the old instance are dropped.
    pub fn update_server(&self, id: &str, mut config: ServerConfig) -> Result<Arc<ToolServer>> {
        config.id = id.to_string();
        let _guard = self.write_guard();
        self.remove_locked(id)?;
        self.create_locked(config)
    }

    /// Returns false when no server is registered under `id`.
    pub fn remove_server(&self, id: &str) -> Result<bool> {
        let _guard = self.write_guard();
        self.remove_locked(id)
    }

    fn remove_locked(&self, id: &str) -> Result<bool> {
        let removed = self
            .servers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        let mut configs = self.server_configs()?;
        if configs.remove(id).is_some() {
            self.persist(&configs)?;
        }
        if removed {
            tracing::info!(server_id = %id, "server removed");
        }
        Ok(removed)
    }

    pub fn get_server(&self, id: &str) -> Option<Arc<ToolServer>> {
        self.servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn servers(&self) -> Vec<Arc<ToolServer>> {
        self.servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// `server-<model id>` named after the model, embedding it.
    pub fn create_server_from_model_config(&self, model: ModelConfig) -> Result<Arc<ToolServer>> {
        self.create_server(ServerConfig {
            id: format!("server-{}", model.id),
            name: format!("{} Server", model.name),
            description: None,
            model: Some(model),
        })
    }

    /// Expire stale steps on every live server.
    pub fn purge_expired_steps(&self) -> usize {
        self.servers().iter().map(|s| s.purge_expired()).sum()
    }
}
