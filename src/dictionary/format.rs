use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::warn;

use super::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Selects the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yml" | "yaml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Parses a flat mapping of scalar keys to scalar values.
    pub(super) fn parse(self, content: &str) -> Result<BTreeMap<String, String>, LoadError> {
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match self {
            Self::Yaml => parse_yaml(content),
            Self::Json => parse_json(content),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yaml => f.write_str("YAML"),
            Self::Json => f.write_str("JSON"),
        }
    }
}

fn parse_yaml(content: &str) -> Result<BTreeMap<String, String>, LoadError> {
    use serde_yaml::Value;

    fn scalar(value: Value) -> Result<String, Value> {
        match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok(String::new()),
            Value::Tagged(tagged) => scalar(tagged.value),
            other => Err(other),
        }
    }

    let document: YamlDocument =
        serde_yaml::from_str(content).map_err(|err| LoadError::Parse {
            format: Format::Yaml,
            message: err.to_string(),
        })?;
    let mapping = match document {
        YamlDocument::Null => return Ok(BTreeMap::new()),
        YamlDocument::Mapping(mapping) => mapping,
        YamlDocument::Other => return Err(LoadError::NotAMapping(Format::Yaml)),
    };

    let mut entries = BTreeMap::new();
    for (key, value) in mapping {
        let key = scalar(key).map_err(|key| LoadError::NestedValue(format!("{key:?}")))?;
        let value = scalar(value).map_err(|_| LoadError::NestedValue(key.clone()))?;
        insert_entry(&mut entries, key, value);
    }
    Ok(entries)
}

/// Top-level YAML document. Mapping entries are kept in file order, so a
/// repeated key ends up with its last value once inserted.
enum YamlDocument {
    Null,
    Mapping(Vec<(serde_yaml::Value, serde_yaml::Value)>),
    Other,
}

impl<'de> Deserialize<'de> for YamlDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(YamlDocumentVisitor)
    }
}

struct YamlDocumentVisitor;

impl<'de> Visitor<'de> for YamlDocumentVisitor {
    type Value = YamlDocument;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of keys to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::new();
        while let Some(entry) = map.next_entry()? {
            entries.push(entry);
        }
        Ok(YamlDocument::Mapping(entries))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(YamlDocument::Other)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(YamlDocument::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(YamlDocument::Null)
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(YamlDocument::Other)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(YamlDocument::Other)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(YamlDocument::Other)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(YamlDocument::Other)
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
        Ok(YamlDocument::Other)
    }
}

fn parse_json(content: &str) -> Result<BTreeMap<String, String>, LoadError> {
    use serde_json::Value;

    let document: Value = serde_json::from_str(content).map_err(|err| LoadError::Parse {
        format: Format::Json,
        message: err.to_string(),
    })?;
    let object = match document {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Object(object) => object,
        _ => return Err(LoadError::NotAMapping(Format::Json)),
    };

    let mut entries = BTreeMap::new();
    for (key, value) in object {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Array(_) | Value::Object(_) => return Err(LoadError::NestedValue(key)),
        };
        insert_entry(&mut entries, key, value);
    }
    Ok(entries)
}

fn insert_entry(entries: &mut BTreeMap<String, String>, key: String, value: String) {
    if key.is_empty() {
        warn!(kind = "empty dictionary key", msg = "entry skipped", value);
        return;
    }
    entries.insert(key, value);
}
