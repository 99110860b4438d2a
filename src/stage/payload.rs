//! Named artifacts produced by a stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A single payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Artifact {
    /// File written by an external program.
    File(PathBuf),
    Text(String),
    Number(f64),
}

impl Artifact {
    /// Path, if this is a file artifact.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            _ => None,
        }
    }

    /// Number, if this is a numeric artifact.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Value rendered as a program input.
    pub fn render(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Text(text) => text.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

impl From<PathBuf> for Artifact {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<f64> for Artifact {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for Artifact {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Artifact map owned by one stage controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    entries: BTreeMap<String, Artifact>,
}

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Artifact>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Entry by key.
    pub fn get(&self, key: &str) -> Option<&Artifact> {
        self.entries.get(key)
    }

    /// File entry by key.
    pub fn path(&self, key: &str) -> Option<&Path> {
        self.get(key).and_then(Artifact::as_path)
    }

    /// Numeric entry by key.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Artifact::as_number)
    }

    /// Check if an entry exists.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Artifact> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut payload = Payload::new();
        payload.insert("spot_list", PathBuf::from("/work/strong.refl"));
        payload.insert("low_resolution", 36.2);

        assert_eq!(payload.path("spot_list"), Some(Path::new("/work/strong.refl")));
        assert_eq!(payload.path("low_resolution"), None);
        assert_eq!(payload.number("low_resolution"), Some(36.2));
    }

    #[test]
    fn serialized_form_is_tagged() {
        let mut payload = Payload::new();
        payload.insert("mode", "fft3d".to_string());
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"mode":{"type":"text","value":"fft3d"}}"#);
    }
}
