use plist::{Dictionary, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlistError {
    #[error("failed to load plist {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    #[error("failed to save plist {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    #[error("plist {0} does not have a dictionary at its root")]
    RootNotDictionary(PathBuf),

    #[error("invalid key path {0:?}: segments must be non-empty")]
    InvalidKeyPath(String),

    #[error("key path {key_path:?} crosses non-dictionary value at {segment:?}")]
    NotADictionary { key_path: String, segment: String },

    #[error("unsupported value for {key_path:?}: {reason}")]
    UnsupportedValue { key_path: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct PlistDocument {
    root: Value,
}

impl Default for PlistDocument {
    fn default() -> Self {
        Self {
            root: Value::Dictionary(Dictionary::new()),
        }
    }
}

impl PlistDocument {
    pub fn load(path: &Path) -> Result<Self, PlistError> {
        let root = Value::from_file(path).map_err(|source| PlistError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        if root.as_dictionary().is_none() {
            return Err(PlistError::RootNotDictionary(path.to_path_buf()));
        }
        Ok(Self { root })
    }

    pub fn get(&self, key_path: &str) -> Option<&Value> {
        let segments = split_key_path(key_path).ok()?;
        let mut cur = &self.root;
        for seg in segments {
            cur = cur.as_dictionary()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn set(&mut self, key_path: &str, value: impl Into<Value>) -> Result<(), PlistError> {
        let segments = split_key_path(key_path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| PlistError::InvalidKeyPath(key_path.to_string()))?;
        let mut cur = match self.root.as_dictionary_mut() {
            Some(d) => d,
            None => {
                return Err(PlistError::NotADictionary {
                    key_path: key_path.to_string(),
                    segment: String::new(),
                })
            }
        };
        for seg in parents {
            if !cur.contains_key(seg) {
                cur.insert(seg.to_string(), Value::Dictionary(Dictionary::new()));
            }
            cur = match cur.get_mut(seg) {
                Some(Value::Dictionary(d)) => d,
                _ => {
                    return Err(PlistError::NotADictionary {
                        key_path: key_path.to_string(),
                        segment: seg.to_string(),
                    })
                }
            };
        }
        cur.insert(last.to_string(), value.into());
        Ok(())
    }

    pub fn set_json(&mut self, key_path: &str, value: &serde_json::Value) -> Result<(), PlistError> {
        let converted = json_to_plist(key_path, value)?;
        self.set(key_path, converted)
    }

    pub fn save(&self, path: &Path) -> Result<(), PlistError> {
        self.root.to_file_xml(path).map_err(|source| PlistError::Save {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn split_key_path(key_path: &str) -> Result<Vec<&str>, PlistError> {
    let segments: Vec<&str> = key_path.split('/').collect();
    if key_path.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(PlistError::InvalidKeyPath(key_path.to_string()));
    }
    Ok(segments)
}

/// Converts a JSON value into the equivalent plist value. `null` has no
/// plist counterpart and is rejected; `key_path` is only used for errors.
pub fn json_to_plist(key_path: &str, value: &serde_json::Value) -> Result<Value, PlistError> {
    use serde_json::Value as Json;
    let unsupported = |reason: &str| PlistError::UnsupportedValue {
        key_path: key_path.to_string(),
        reason: reason.to_string(),
    };
    Ok(match value {
        Json::Null => return Err(unsupported("null has no plist representation")),
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else if let Some(f) = n.as_f64() {
                Value::Real(f)
            } else {
                return Err(unsupported("number out of range"));
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| json_to_plist(key_path, item))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Json::Object(map) => {
            let mut dict = Dictionary::new();
            for (k, v) in map {
                dict.insert(k.clone(), json_to_plist(key_path, v)?);
            }
            Value::Dictionary(dict)
        }
    })
}
