//! Key/value persistence used by the model and server managers.
//!
//! Each store is one JSON document whose top-level keys (`models`,
//! `servers`) hold id → config maps. Writes are last-write-wins per key.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::StoreError;

/// Durable key/value capability.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError>;
    fn set(&self, key: &str, value: JsonValue) -> Result<(), StoreError>;
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single pretty-printed JSON file.
///
/// The whole document is cached in memory and rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<JsonMap<String, JsonValue>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`. Keys absent from the file
    /// are filled from `defaults`.
    pub fn open(
        path: impl Into<PathBuf>,
        defaults: &[(&str, JsonValue)],
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let mut doc = match std::fs::read_to_string(&path) {
            Ok(s) if s.trim().is_empty() => JsonMap::new(),
            Ok(s) => match serde_json::from_str::<JsonValue>(&s)? {
                JsonValue::Object(m) => m,
                other => {
                    tracing::warn!(
                        "store {} has non-object root ({}); starting empty",
                        path.display(),
                        type_name(&other)
                    );
                    JsonMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JsonMap::new(),
            Err(e) => return Err(e.into()),
        };
        for (k, v) in defaults {
            doc.entry(k.to_string()).or_insert_with(|| v.clone());
        }
        tracing::debug!("opened store {} (keys={})", path.display(), doc.len());
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    fn flush(&self, doc: &JsonMap<String, JsonValue>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let body = serde_json::to_string_pretty(doc)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        Ok(doc.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.insert(key.to_string(), value);
        self.flush(&doc)
    }
}

fn type_name(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("servers").unwrap().is_none());
        store.set("servers", json!({"a": 1})).unwrap();
        assert_eq!(store.get("servers").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn file_store_applies_defaults_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("mcp-servers.json");

        let store = JsonFileStore::open(&path, &[("servers", json!({}))]).expect("open");
        assert_eq!(store.get("servers").unwrap(), Some(json!({})));
        store
            .set("servers", json!({"s1": {"id": "s1", "name": "One"}}))
            .expect("set");

        let reopened = JsonFileStore::open(&path, &[("servers", json!({}))]).expect("reopen");
        let servers = reopened.get("servers").unwrap().expect("servers key");
        assert_eq!(servers["s1"]["name"], "One");
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::open(&path, &[]).unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
