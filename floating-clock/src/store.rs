//! Durable key-value storage for the daemon

use directories::ProjectDirs;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage document at {0:?} is not a JSON object")]
    NotAnObject(PathBuf),
}

/// A store of JSON values by string key, surviving restarts.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set_item(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// All keys live in a single JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "floating-clock", "floating-clock")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(proj_dirs.data_dir().join("storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>, StoreError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&json)? {
            Value::Object(document) => Ok(document),
            _ => Err(StoreError::NotAnObject(self.path.clone())),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(document)?;

        // Rename over the old file so readers never see a half-written document
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_document()?.remove(key))
    }

    fn set_item(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut document = self.read_document()?;
        document.insert(key.to_string(), value);
        self.write_document(&document)
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    items: std::collections::HashMap<String, Value>,
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.items.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("storage.json"));
        assert!(store.get_item("timerState").unwrap().is_none());
    }

    #[test]
    fn writes_keep_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"position":{"x":4,"y":8}}"#).unwrap();

        let mut store = JsonFileStore::new(&path);
        store
            .set_item("timerState", json!({ "currentTime": 12 }))
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            reopened.get_item("timerState").unwrap(),
            Some(json!({ "currentTime": 12 }))
        );
        assert_eq!(
            reopened.get_item("position").unwrap(),
            Some(json!({ "x": 4, "y": 8 }))
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("storage.json");
        let mut store = JsonFileStore::new(&path);
        store.set_item("k", json!(true)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn non_object_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get_item("timerState"),
            Err(StoreError::NotAnObject(_))
        ));
    }
}
