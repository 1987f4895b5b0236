//! CRUD over persisted model configurations.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;

use super::{ModelConfig, ModelPatch, ProviderKind};
use crate::error::{Entity, Result, ToolgateError};
use crate::provider::factory::validate_model_config;
use crate::store::KvStore;

const MODELS_KEY: &str = "models";

pub const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const QIANWEN_API_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

/// Model configurations keyed by id, mirrored to the `models` store key.
///
/// The store is the source of truth; every call reads it afresh. Writes
/// go through one guard so that concurrent read-modify-write cycles do not
/// drop each other's changes.
pub struct ModelManager {
    store: Arc<dyn KvStore>,
    writes: Mutex<()>,
}

impl ModelManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            writes: Mutex::new(()),
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self) -> Result<BTreeMap<String, ModelConfig>> {
        let Some(raw) = self.store.get(MODELS_KEY)? else {
            return Ok(BTreeMap::new());
        };
        let Some(entries) = raw.as_object() else {
            tracing::warn!("ignoring malformed '{}' entry in store", MODELS_KEY);
            return Ok(BTreeMap::new());
        };
        let mut out = BTreeMap::new();
        for (id, v) in entries {
            match serde_json::from_value::<ModelConfig>(v.clone()) {
                Ok(cfg) => {
                    out.insert(id.clone(), cfg);
                }
                Err(e) => tracing::warn!("skipping unreadable model '{}': {}", id, e),
            }
        }
        Ok(out)
    }

    fn save(&self, models: &BTreeMap<String, ModelConfig>) -> Result<()> {
        let value = serde_json::to_value(models).map_err(crate::error::StoreError::from)?;
        self.store.set(MODELS_KEY, value)?;
        Ok(())
    }

    pub fn models(&self) -> Result<Vec<ModelConfig>> {
        Ok(self.load()?.into_values().collect())
    }

    pub fn get_model(&self, id: &str) -> Result<Option<ModelConfig>> {
        Ok(self.load()?.remove(id))
    }

    /// Insert or replace a model. The payload must match its provider's shape.
    pub fn add_model(&self, config: ModelConfig) -> Result<ModelConfig> {
        let _guard = self.write_guard();
        self.add_locked(config)
    }

    fn add_locked(&self, config: ModelConfig) -> Result<ModelConfig> {
        validate_model_config(&config)?;
        let mut models = self.load()?;
        models.insert(config.id.clone(), config.clone());
        self.save(&models)?;
        tracing::info!(model_id = %config.id, provider = %config.provider, "model saved");
        Ok(config)
    }

    /// Merge `patch` into the model under `id`. Returns `None` if absent.
    pub fn update_model(&self, id: &str, patch: ModelPatch) -> Result<Option<ModelConfig>> {
        let _guard = self.write_guard();
        self.update_locked(id, patch)
    }

    fn update_locked(&self, id: &str, patch: ModelPatch) -> Result<Option<ModelConfig>> {
        let mut models = self.load()?;
        let Some(existing) = models.get(id) else {
            return Ok(None);
        };
        let mut updated = existing.clone();
        updated.apply(patch);
        validate_model_config(&updated)?;
        models.insert(id.to_string(), updated.clone());
        self.save(&models)?;
        tracing::info!(model_id = %id, "model updated");
        Ok(Some(updated))
    }

    /// Update when `config.id` is known, add otherwise.
    pub fn save_model(&self, config: ModelConfig) -> Result<ModelConfig> {
        let _guard = self.write_guard();
        if self.get_model(&config.id)?.is_some() {
            let id = config.id.clone();
            let patch = ModelPatch {
                name: Some(config.name),
                provider: Some(config.provider),
                config: Some(config.config),
            };
            self.update_locked(&id, patch)?
                .ok_or_else(|| ToolgateError::not_found(Entity::Model, id))
        } else {
            self.add_locked(config)
        }
    }

    pub fn remove_model(&self, id: &str) -> Result<bool> {
        let _guard = self.write_guard();
        let mut models = self.load()?;
        if models.remove(id).is_none() {
            return Ok(false);
        }
        self.save(&models)?;
        tracing::info!(model_id = %id, "model removed");
        Ok(true)
    }

    /// Seed the stock model set. API keys may be empty.
    pub fn add_default_models(&self, deepseek_key: &str, qwen_key: &str) -> Result<()> {
        for m in default_models(deepseek_key, qwen_key) {
            self.add_model(m)?;
        }
        Ok(())
    }
}

pub fn default_models(deepseek_key: &str, qwen_key: &str) -> Vec<ModelConfig> {
    vec![
        ModelConfig::new(
            "ollama-llama2",
            "Ollama Llama2",
            ProviderKind::Ollama,
            json!({
                "baseUrl": "http://localhost:11434",
                "modelName": "llama2",
            }),
        ),
        ModelConfig::new(
            "deepseek-coder",
            "DeepSeek Coder",
            ProviderKind::DeepSeek,
            json!({
                "apiKey": deepseek_key,
                "modelName": "deepseek-coder",
                "apiUrl": DEEPSEEK_API_URL,
            }),
        ),
        ModelConfig::new(
            "qianwen-base",
            "Tongyi Qianwen",
            ProviderKind::Qianwen,
            json!({
                "apiKey": qwen_key,
                "modelName": "qwen-turbo",
                "apiUrl": QIANWEN_API_URL,
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, MemoryStore};

    fn manager() -> ModelManager {
        ModelManager::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn defaults_are_seeded_and_listed() {
        let mm = manager();
        assert!(mm.models().unwrap().is_empty());
        mm.add_default_models("", "").unwrap();
        let ids: Vec<String> = mm.models().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["deepseek-coder", "ollama-llama2", "qianwen-base"]);
    }

    #[test]
    fn update_merges_and_unknown_id_is_none() {
        let mm = manager();
        mm.add_default_models("k1", "k2").unwrap();
        let updated = mm
            .update_model(
                "ollama-llama2",
                ModelPatch {
                    name: Some("Local".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .expect("model exists");
        assert_eq!(updated.name, "Local");
        assert_eq!(updated.config["modelName"], "llama2");
        assert!(
            mm.update_model("missing", ModelPatch::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn add_rejects_missing_required_field() {
        let mm = manager();
        let bad = ModelConfig::new(
            "ds",
            "DeepSeek",
            ProviderKind::DeepSeek,
            json!({"modelName": "deepseek-chat", "apiUrl": DEEPSEEK_API_URL}),
        );
        let err = mm.add_model(bad).unwrap_err();
        assert!(matches!(err, ToolgateError::Validation(ref m) if m.contains("apiKey")));
        assert!(mm.get_model("ds").unwrap().is_none());
    }

    #[test]
    fn remove_twice_reports_absence() {
        let mm = manager();
        mm.add_default_models("", "").unwrap();
        assert!(mm.remove_model("qianwen-base").unwrap());
        assert!(!mm.remove_model("qianwen-base").unwrap());
    }

    fn ollama(id: &str) -> ModelConfig {
        ModelConfig::new(
            id,
            id,
            ProviderKind::Ollama,
            json!({"baseUrl": "http://localhost:11434", "modelName": "llama2"}),
        )
    }

    #[test]
    fn concurrent_writes_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-servers.json");
        let defaults = [("models", json!({}))];
        let store: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(path.clone(), &defaults).unwrap());
        let mm = ModelManager::new(store);

        std::thread::scope(|scope| {
            for i in 0..16 {
                let mm = &mm;
                scope.spawn(move || {
                    mm.add_model(ollama(&format!("m{i}"))).unwrap();
                    let mut renamed = ollama(&format!("m{i}"));
                    renamed.name = format!("saved {i}");
                    mm.save_model(renamed).unwrap();
                });
            }
        });
        std::thread::scope(|scope| {
            for i in 0..4 {
                let mm = &mm;
                scope.spawn(move || assert!(mm.remove_model(&format!("m{i}")).unwrap()));
            }
        });
        assert_eq!(mm.models().unwrap().len(), 12);
        drop(mm);

        let store: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(path, &defaults).unwrap());
        let reopened = ModelManager::new(store);
        let models = reopened.models().unwrap();
        assert_eq!(models.len(), 12);
        assert!(models.iter().all(|m| m.name.starts_with("saved ")));
    }

    #[test]
    fn save_model_adds_then_updates() {
        let mm = manager();
        let mut m = default_models("", "").remove(0);
        mm.save_model(m.clone()).unwrap();
        m.name = "Renamed".into();
        let saved = mm.save_model(m).unwrap();
        assert_eq!(saved.name, "Renamed");
        assert_eq!(mm.models().unwrap().len(), 1);
    }
}
