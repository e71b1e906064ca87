//! Storage class registry.
//!
//! A class list names the kinds of volume a populated image may land on,
//! each with a map of capabilities (`iops: 3000`, `throughput: 250Mi`).
//! Lists are written in YAML or JSON, either bare or under a `classes:` key:
//!
//! ```yaml
//! classes:
//!   - name: fast
//!     description: NVMe-backed
//!     capabilities:
//!       iops: 16000
//!       throughput: 1Gi
//!   - name: bulk
//!     capabilities:
//!       throughput: 125M
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading a class list.
#[derive(Error, Debug)]
pub enum ClassError {
    #[error("failed to read class list {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON class list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML class list: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate storage class name(s): {}", .names.join(", "))]
    Duplicate { names: Vec<String> },

    #[error("storage class at position {index} has an empty name")]
    EmptyName { index: usize },
}

pub type Result<T> = std::result::Result<T, ClassError>;

/// A capability amount.
///
/// Accepts plain integers or strings with a decimal (`k`, `M`, `G`, `T`) or
/// binary (`Ki`, `Mi`, `Gi`, `Ti`) suffix.  Serializes back as the integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(u64);

impl Quantity {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);
        if digits.is_empty() {
            return Err(format!("invalid quantity '{s}': expected a number"));
        }
        let multiplier: u64 = match suffix {
            "" => 1,
            "k" => 1_000,
            "M" => 1_000_000,
            "G" => 1_000_000_000,
            "T" => 1_000_000_000_000,
            "Ki" => 1 << 10,
            "Mi" => 1 << 20,
            "Gi" => 1 << 30,
            "Ti" => 1 << 40,
            other => return Err(format!("invalid quantity '{s}': unknown suffix '{other}'")),
        };
        digits
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(multiplier))
            .map(Quantity)
            .ok_or_else(|| format!("invalid quantity '{s}': out of range"))
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(Quantity(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// One named storage class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClass {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, Quantity>,
}

impl StorageClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            capabilities: BTreeMap::new(),
        }
    }

    pub fn with_capability(mut self, key: impl Into<String>, value: impl Into<Quantity>) -> Self {
        self.capabilities.insert(key.into(), value.into());
        self
    }

    pub fn capability(&self, key: &str) -> Option<Quantity> {
        self.capabilities.get(key).copied()
    }
}

/// Storage classes keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, StorageClass>,
}

impl ClassRegistry {
    /// Parse a class list.  Input starting with `{` or `[` is JSON, anything
    /// else is YAML.
    pub fn load(source: &str) -> Result<Self> {
        let trimmed = source.trim_start();
        let classes = if trimmed.is_empty() {
            Vec::new()
        } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let value: serde_json::Value = serde_json::from_str(trimmed)?;
            let list = match value {
                serde_json::Value::Object(mut map) if map.contains_key("classes") => {
                    map.remove("classes").unwrap_or_default()
                }
                other => other,
            };
            match list {
                serde_json::Value::Null => Vec::new(),
                list => serde_json::from_value(list)?,
            }
        } else {
            let value: serde_yaml::Value = serde_yaml::from_str(source)?;
            let list = match value {
                serde_yaml::Value::Mapping(mut map) if map.contains_key("classes") => {
                    map.remove("classes").unwrap_or_default()
                }
                other => other,
            };
            match list {
                serde_yaml::Value::Null => Vec::new(),
                list => serde_yaml::from_value(list)?,
            }
        };
        Self::from_classes(classes)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ClassError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::load(&raw)?;
        debug!(path = %path.display(), classes = registry.len(), "loaded storage classes");
        Ok(registry)
    }

    /// Build a registry, rejecting empty names and naming every duplicate.
    pub fn from_classes(classes: impl IntoIterator<Item = StorageClass>) -> Result<Self> {
        let mut by_name: HashMap<String, StorageClass> = HashMap::new();
        let mut duplicates: Vec<String> = Vec::new();

        for (index, class) in classes.into_iter().enumerate() {
            if class.name.trim().is_empty() {
                return Err(ClassError::EmptyName { index });
            }
            if by_name.contains_key(&class.name) {
                if !duplicates.contains(&class.name) {
                    duplicates.push(class.name);
                }
                continue;
            }
            by_name.insert(class.name.clone(), class);
        }

        if !duplicates.is_empty() {
            return Err(ClassError::Duplicate { names: duplicates });
        }
        Ok(Self { classes: by_name })
    }

    pub fn get(&self, name: &str) -> Option<&StorageClass> {
        self.classes.get(name)
    }

    /// All classes, in no particular order.
    pub fn list(&self) -> impl Iterator<Item = &StorageClass> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
