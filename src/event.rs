use serde_json::{Map, Value};

/// Field holding the list of tags added on a match.
pub const TAGS_FIELD: &str = "tags";

/// Mapping-like event the filter reads from and writes to.
pub trait Event {
    fn get(&self, field: &str) -> Option<&Value>;

    fn set(&mut self, field: &str, value: Value);

    /// Appends `tag` to the event's tags unless already present.
    fn add_tag(&mut self, tag: &str) -> Result<(), EventError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("`tags` field holds {0} instead of a list")]
    TagsNotList(&'static str),
}

impl Event for Map<String, Value> {
    fn get(&self, field: &str) -> Option<&Value> {
        Map::get(self, field)
    }

    fn set(&mut self, field: &str, value: Value) {
        self.insert(field.to_string(), value);
    }

    fn add_tag(&mut self, tag: &str) -> Result<(), EventError> {
        let tags = self.entry(TAGS_FIELD).or_insert(Value::Null);
        match *tags {
            Value::Null => *tags = Value::Array(Vec::new()),
            Value::String(ref mut single) => {
                let single = std::mem::take(single);
                *tags = Value::Array(vec![Value::String(single)]);
            }
            _ => {}
        }
        match tags {
            Value::Array(list) => {
                if !list.iter().any(|t| t.as_str() == Some(tag)) {
                    list.push(Value::String(tag.to_string()));
                }
                Ok(())
            }
            other => Err(EventError::TagsNotList(value_kind(other))),
        }
    }
}

/// Text the filter matches against: a sequence contributes only its first
/// element, everything else its plain string form.
pub(crate) fn source_text(value: &Value) -> Result<String, serde_json::Error> {
    match value {
        Value::Array(list) => list.first().map_or(Ok(String::new()), scalar_text),
        other => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> Result<String, serde_json::Error> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
